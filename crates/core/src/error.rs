// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job error taxonomy.
//!
//! Failures are classified with a tagged [`ErrorKind`] instead of an error
//! class hierarchy; the runners consult the kind when deciding whether an
//! attempt may be retried.

use serde::{Deserialize, Serialize};

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid user input or configuration. Never retried.
    Validation,
    /// Domain rule violation. Never retried.
    Domain,
    /// External integration failed (network, remote API). Retryable.
    Integration,
    /// IO / OS / driver / filesystem failure. Retryable.
    Infrastructure,
    /// Cooperative cancellation. Terminal.
    Cancelled,
    /// Deadline elapsed. Terminal.
    Timeout,
    /// Anything else. Fails without retry.
    Unknown,
}

crate::simple_display! {
    ErrorKind {
        Validation => "validation",
        Domain => "domain",
        Integration => "integration",
        Infrastructure => "infrastructure",
        Cancelled => "cancelled",
        Timeout => "timeout",
        Unknown => "unknown",
    }
}

/// Error produced by a job or its supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain, message)
    }

    pub fn integration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integration, message)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Whether the kind is in the retry whitelist.
    ///
    /// Only transient failure classes qualify; attempt counts and deadlines
    /// are enforced by the runner's retry policy on top of this.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Integration | ErrorKind::Infrastructure)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::infrastructure(e.to_string())
    }
}

/// Best-effort text from a panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
