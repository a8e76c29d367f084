// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL store for `Job*` events.
//!
//! One JSON object per line: `{"type": ..., "data": {...}, "ts": ...}`.
//! Designed to be resilient:
//! - append and rotation never propagate errors (persistence is
//!   best-effort; the app must not crash because a disk filled up)
//! - malformed lines are skipped on load
//! - parent directories are created automatically

use chrono::{SecondsFormat, Utc};
use mill_core::Event;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_ARCHIVES: usize = 5;

pub struct JsonlEventStore {
    path: PathBuf,
    max_bytes: u64,
    max_archives: usize,
}

impl JsonlEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_limits(path, DEFAULT_MAX_BYTES, DEFAULT_MAX_ARCHIVES)
    }

    pub fn with_limits(path: impl Into<PathBuf>, max_bytes: u64, max_archives: usize) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        Self { path, max_bytes, max_archives }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Filesystem failures are logged and swallowed.
    pub fn append(&self, event: &Event) {
        let Some(record) = pack_event(event) else {
            return;
        };
        self.rotate_if_needed();
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event record");
                return;
            }
        };
        let opened = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match opened {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to append event");
                }
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to open event store");
            }
        }
    }

    /// Load previously stored records. Blank and malformed lines are
    /// skipped; a missing or unreadable file yields an empty list.
    pub fn load(&self) -> Vec<serde_json::Value> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                let value: serde_json::Value = serde_json::from_str(line).ok()?;
                let obj = value.as_object()?;
                if obj.contains_key("type") && obj.contains_key("data") {
                    Some(value)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Remove the journal file. Best-effort.
    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clear event store");
            }
        }
    }

    /// Rename the journal to a timestamped archive when it outgrows
    /// `max_bytes`, pruning archives beyond `max_archives` oldest-first.
    /// Never raises; rotation failure only costs disk space.
    fn rotate_if_needed(&self) {
        if self.max_bytes == 0 {
            return;
        }
        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        if meta.len() <= self.max_bytes {
            return;
        }

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let rotated = self.path.with_file_name(format!("{stem}.{stamp}{suffix}"));
        if let Err(e) = fs::rename(&self.path, &rotated) {
            tracing::warn!(path = %self.path.display(), error = %e, "event store rotation failed");
            return;
        }
        self.prune_archives(&stem, &suffix);
    }

    fn prune_archives(&self, stem: &str, suffix: &str) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(parent) else {
            return;
        };
        let current = self.path.file_name().map(|n| n.to_os_string());
        let mut archives: Vec<(std::time::SystemTime, PathBuf)> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if Some(entry.file_name()) == current {
                    return None;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(&format!("{stem}.")) || !name.ends_with(suffix) {
                    return None;
                }
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((mtime, entry.path()))
            })
            .collect();

        // Newest first; everything past the cap goes.
        archives.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in archives.into_iter().skip(self.max_archives) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune archive");
            }
        }
    }
}

/// Convert an event to its journal record, stamping the current time.
///
/// Only `Job*` events are journaled; training events reach the store as
/// the synthetic job events the registry derives from them.
pub(crate) fn pack_event(event: &Event) -> Option<serde_json::Value> {
    if event.job_id().is_none() {
        return None;
    }
    let mut record = match serde_json::to_value(event) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!("failed to pack event for the journal");
            return None;
        }
    };
    record.insert(
        "ts".to_string(),
        serde_json::Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Some(serde_json::Value::Object(record))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
