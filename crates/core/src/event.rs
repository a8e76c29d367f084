// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain events published on the [`EventBus`](crate::bus::EventBus).
//!
//! Serializes with `{"type": "EventName", "data": {...fields}}` framing so
//! the JSONL journal falls straight out of serde.

use crate::id::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle events emitted by the job runners, plus the training-domain
/// events the registry mirrors onto the same job lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    // -- job lifecycle --
    JobStarted {
        job_id: JobId,
        name: String,
    },

    JobProgress {
        job_id: JobId,
        name: String,
        /// Completed fraction in [0, 1].
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A single log line, or a batched newline-joined block of lines.
    JobLogLine {
        job_id: JobId,
        name: String,
        line: String,
    },

    /// Emitted when a job is about to be retried after a failure.
    JobRetrying {
        job_id: JobId,
        name: String,
        /// 1-based attempt that just failed.
        attempt: u32,
        max_attempts: u32,
        error: String,
    },

    /// Emitted when a job exceeded its timeout and was cancelled.
    JobTimedOut {
        job_id: JobId,
        name: String,
        timeout_sec: f64,
    },

    JobFinished {
        job_id: JobId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },

    JobFailed {
        job_id: JobId,
        name: String,
        error: String,
    },

    JobCancelled {
        job_id: JobId,
        name: String,
    },

    // -- training domain (mirrored into the registry as job records) --
    TrainingStarted {
        model_name: String,
        epochs: u32,
        project: PathBuf,
    },

    TrainingProgress {
        fraction: f64,
        message: String,
    },

    TrainingFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_weights_path: Option<PathBuf>,
    },

    TrainingFailed {
        error: String,
    },

    TrainingCancelled {
        message: String,
    },
}

/// Tag-only discriminant of [`Event`], used as the bus subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobStarted,
    JobProgress,
    JobLogLine,
    JobRetrying,
    JobTimedOut,
    JobFinished,
    JobFailed,
    JobCancelled,
    TrainingStarted,
    TrainingProgress,
    TrainingFinished,
    TrainingFailed,
    TrainingCancelled,
}

impl EventKind {
    /// The job lifecycle kinds, in a stable order.
    pub const JOB_KINDS: [EventKind; 8] = [
        EventKind::JobStarted,
        EventKind::JobProgress,
        EventKind::JobLogLine,
        EventKind::JobRetrying,
        EventKind::JobTimedOut,
        EventKind::JobFinished,
        EventKind::JobFailed,
        EventKind::JobCancelled,
    ];

    /// The training domain kinds, in a stable order.
    pub const TRAINING_KINDS: [EventKind; 5] = [
        EventKind::TrainingStarted,
        EventKind::TrainingProgress,
        EventKind::TrainingFinished,
        EventKind::TrainingFailed,
        EventKind::TrainingCancelled,
    ];
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JobStarted { .. } => EventKind::JobStarted,
            Event::JobProgress { .. } => EventKind::JobProgress,
            Event::JobLogLine { .. } => EventKind::JobLogLine,
            Event::JobRetrying { .. } => EventKind::JobRetrying,
            Event::JobTimedOut { .. } => EventKind::JobTimedOut,
            Event::JobFinished { .. } => EventKind::JobFinished,
            Event::JobFailed { .. } => EventKind::JobFailed,
            Event::JobCancelled { .. } => EventKind::JobCancelled,
            Event::TrainingStarted { .. } => EventKind::TrainingStarted,
            Event::TrainingProgress { .. } => EventKind::TrainingProgress,
            Event::TrainingFinished { .. } => EventKind::TrainingFinished,
            Event::TrainingFailed { .. } => EventKind::TrainingFailed,
            Event::TrainingCancelled { .. } => EventKind::TrainingCancelled,
        }
    }

    /// The job this event belongs to, for `Job*` variants.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Event::JobStarted { job_id, .. }
            | Event::JobProgress { job_id, .. }
            | Event::JobLogLine { job_id, .. }
            | Event::JobRetrying { job_id, .. }
            | Event::JobTimedOut { job_id, .. }
            | Event::JobFinished { job_id, .. }
            | Event::JobFailed { job_id, .. }
            | Event::JobCancelled { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// The job name carried by `Job*` variants.
    pub fn job_name(&self) -> Option<&str> {
        match self {
            Event::JobStarted { name, .. }
            | Event::JobProgress { name, .. }
            | Event::JobLogLine { name, .. }
            | Event::JobRetrying { name, .. }
            | Event::JobTimedOut { name, .. }
            | Event::JobFinished { name, .. }
            | Event::JobFailed { name, .. }
            | Event::JobCancelled { name, .. } => Some(name),
            _ => None,
        }
    }

    /// True for the four absorbing job outcomes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::JobFinished { .. }
                | Event::JobFailed { .. }
                | Event::JobCancelled { .. }
                | Event::JobTimedOut { .. }
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
