// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal replay: pure reconstruction of registry state.
//!
//! Replay decodes journal records leniently — coercible fields coerce,
//! anything unusable is skipped — and feeds them through the same fold as
//! live events, with persistence suppressed so replay never re-appends.

use crate::registry::Inner;
use mill_core::{Clock, Event, JobId};
use serde_json::Value;

pub(crate) fn replay_store<C: Clock>(inner: &Inner<C>) {
    let Some(store) = &inner.store else {
        return;
    };
    for record in store.load() {
        if let Some(event) = decode_record(&record) {
            inner.apply_job(&event, false);
        }
    }
    let mut state = inner.state.lock();
    inner.purge_jobs(&mut state);
}

/// Decode one journal record into an event, or `None` to skip it.
///
/// `job_id` is always required. `name` is required only for `JobStarted`;
/// for the other events an absent name leaves the known record name
/// untouched (stores written by older versions omitted it).
pub(crate) fn decode_record(record: &Value) -> Option<Event> {
    let obj = record.as_object()?;
    let event_type = obj.get("type")?.as_str()?;
    let data = obj.get("data")?.as_object()?;

    let job_id = data.get("job_id").and_then(Value::as_str).unwrap_or("");
    if job_id.is_empty() {
        return None;
    }
    let job_id = JobId::from_string(job_id);
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match event_type {
        "JobStarted" => {
            if name.is_empty() {
                return None;
            }
            Some(Event::JobStarted { job_id, name })
        }
        "JobProgress" => {
            let progress = data
                .get("progress")
                .and_then(Value::as_f64)
                .filter(|p| p.is_finite())
                .unwrap_or(0.0);
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(Event::JobProgress { job_id, name, progress, message })
        }
        "JobLogLine" => {
            let line = data.get("line").and_then(Value::as_str).unwrap_or("");
            if line.is_empty() {
                return None;
            }
            Some(Event::JobLogLine { job_id, name, line: line.to_string() })
        }
        "JobRetrying" => {
            let attempt = data
                .get("attempt")
                .and_then(Value::as_u64)
                .map_or(1, |a| a as u32);
            let max_attempts = data
                .get("max_attempts")
                .and_then(Value::as_u64)
                .map_or(attempt, |m| m as u32);
            let error = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Some(Event::JobRetrying { job_id, name, attempt, max_attempts, error })
        }
        "JobTimedOut" => {
            let timeout_sec = data
                .get("timeout_sec")
                .and_then(Value::as_f64)
                .filter(|t| t.is_finite())
                .unwrap_or(0.0);
            Some(Event::JobTimedOut { job_id, name, timeout_sec })
        }
        // The stored result payload is deliberately ignored on replay.
        "JobFinished" => Some(Event::JobFinished { job_id, name, result: None }),
        "JobFailed" => {
            let error = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Some(Event::JobFailed { job_id, name, error })
        }
        "JobCancelled" => Some(Event::JobCancelled { job_id, name }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
