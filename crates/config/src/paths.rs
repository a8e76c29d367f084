// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State-directory discovery.

use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".app_state";

/// Return a writable directory for app state (job history, journals).
///
/// Preference order:
/// 1. `<project_root>/.app_state` when writable (dev and test friendly)
/// 2. the per-platform user data directory
pub fn state_dir(project_root: &Path) -> PathBuf {
    let candidate = project_root.join(STATE_DIR_NAME);
    if dir_is_writable(&candidate) {
        return candidate;
    }
    tracing::debug!(
        candidate = %candidate.display(),
        "project state dir not writable; falling back to user data dir"
    );
    dirs::data_dir()
        .map(|base| base.join("mill"))
        .unwrap_or(candidate)
}

/// Probe by actually writing: permissions alone do not prove a usable
/// directory (read-only mounts, quota).
fn dir_is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".write_test");
    match fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
