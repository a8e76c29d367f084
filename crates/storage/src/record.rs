// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and status.

use chrono::{DateTime, Utc};
use mill_core::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a job as seen by the registry.
///
/// `Finished`, `Failed`, `Cancelled`, and `TimedOut` are absorbing: once a
/// record is terminal, further terminal events are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Retrying,
    Finished,
    Failed,
    Cancelled,
    TimedOut,
}

mill_core::simple_display! {
    JobStatus {
        Running => "running",
        Retrying => "retrying",
        Finished => "finished",
        Failed => "failed",
        Cancelled => "cancelled",
        TimedOut => "timed_out",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }
}

/// Post-submission hook attached by the submitter (rerun or cancel).
pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Live view of one job.
///
/// `get`/`list` return clones with a fresh `logs` vec, so callers can
/// never observe concurrent mutation of registry internals. The hooks are
/// shared intentionally: a cloned record can still rerun or cancel its job.
#[derive(Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Bounded tail; oldest lines are dropped on overflow.
    pub logs: Vec<String>,
    pub rerun: Option<HookFn>,
    pub cancel: Option<HookFn>,
}

impl JobRecord {
    pub fn new(job_id: JobId, name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            name: name.into(),
            status: JobStatus::Running,
            progress: 0.0,
            message: None,
            started_at,
            finished_at: None,
            error: None,
            logs: Vec::new(),
            rerun: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("job_id", &self.job_id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("message", &self.message)
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at)
            .field("error", &self.error)
            .field("logs", &self.logs.len())
            .field("rerun", &self.rerun.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
