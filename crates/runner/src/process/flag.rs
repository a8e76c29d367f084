// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-process cancellation flag.

use mill_core::JobId;
use std::fs;
use std::path::{Path, PathBuf};

/// One-way boolean event shared between the supervisor and its child,
/// backed by a flag file both sides can see.
///
/// `set` creates the file and `is_set` checks for it; once set the flag
/// stays set for the lifetime of the job.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    path: PathBuf,
}

impl CancelFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional per-job flag location inside a scratch directory.
    pub fn for_job(dir: &Path, job_id: &JobId) -> Self {
        Self::new(dir.join(format!("cancel-{job_id}.flag")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.path, b"1") {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to set cancel flag");
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    /// Remove the flag file once the job is terminal. Best-effort.
    pub fn clear(&self) {
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
#[path = "flag_tests.rs"]
mod tests;
