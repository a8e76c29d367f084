// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log-line batching.
//!
//! Bursty jobs can emit hundreds of lines per second; publishing each line
//! as its own event churns every subscriber. Lines observed within a short
//! window are coalesced into a single newline-joined [`Event::JobLogLine`].
//! The registry splits blocks back into lines before enforcing its cap.

use mill_core::{Event, EventBus, JobId};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const LOG_BATCH_INTERVAL: Duration = Duration::from_millis(150);
pub const LOG_BATCH_MAX_LINES: usize = 40;

/// Coalesces a job's log lines into batched `JobLogLine` events.
///
/// Batching merges adjacent lines but never reorders them.
pub struct LogBatcher {
    bus: Arc<EventBus>,
    job_id: JobId,
    name: String,
    pending: Vec<String>,
    last_flush: Option<Instant>,
}

impl LogBatcher {
    pub fn new(bus: Arc<EventBus>, job_id: JobId, name: impl Into<String>) -> Self {
        Self {
            bus,
            job_id,
            name: name.into(),
            pending: Vec::new(),
            last_flush: None,
        }
    }

    /// Queue one line and flush if the window has elapsed.
    pub fn add_line(&mut self, line: &str) {
        let line = line.trim_end_matches('\n');
        if line.trim().is_empty() {
            return;
        }
        self.pending.push(line.to_string());
        self.flush(false);
    }

    /// Publish pending lines in chunks of at most
    /// [`LOG_BATCH_MAX_LINES`]. Without `force`, flushing is skipped while
    /// the batch window since the previous flush is still open.
    pub fn flush(&mut self, force: bool) {
        if self.pending.is_empty() {
            return;
        }
        if !force {
            if let Some(last) = self.last_flush {
                if last.elapsed() < LOG_BATCH_INTERVAL {
                    return;
                }
            }
        }
        while !self.pending.is_empty() {
            let take = self.pending.len().min(LOG_BATCH_MAX_LINES);
            let chunk: Vec<String> = self.pending.drain(..take).collect();
            self.bus.publish(&Event::JobLogLine {
                job_id: self.job_id.clone(),
                name: self.name.clone(),
                line: chunk.join("\n"),
            });
        }
        self.last_flush = Some(Instant::now());
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
