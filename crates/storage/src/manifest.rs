// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job run manifests.
//!
//! Every run leaves a small on-disk record of what was asked for and in
//! which environment it ran, so artifacts stay explainable long after the
//! job history has been evicted from the registry.

use chrono::{SecondsFormat, Utc};
use mill_core::JobId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const MANIFEST_FILE: &str = "run_manifest.json";
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_type: String,
    pub timestamp: String,
    pub job_id: String,
    /// Caller-provided description of the run.
    pub spec: serde_json::Value,
    /// Runtime environment snapshot.
    pub env: serde_json::Value,
    pub git_commit: Option<String>,
    /// Artifact name → path.
    pub artifacts: serde_json::Value,
}

/// Writes run manifests under `<state-dir>/runs/<job_id>/` and keeps the
/// `runs/index.json` mapping current.
pub struct RunManifestWriter {
    runs_root: PathBuf,
}

impl RunManifestWriter {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { runs_root: state_dir.into().join("runs") }
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    /// Record a run. Returns the per-job directory.
    pub fn register(
        &self,
        job_id: &JobId,
        run_type: &str,
        spec: serde_json::Value,
        artifacts: serde_json::Value,
    ) -> io::Result<PathBuf> {
        let run_dir = self.runs_root.join(job_id.as_str());
        fs::create_dir_all(&run_dir)?;

        let manifest = RunManifest {
            run_type: run_type.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            job_id: job_id.as_str().to_string(),
            spec,
            env: environment_snapshot(),
            git_commit: git_commit(),
            artifacts,
        };
        let body = serde_json::to_string_pretty(&manifest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(run_dir.join(MANIFEST_FILE), body)?;

        self.update_index(job_id, &run_dir)?;
        Ok(run_dir)
    }

    /// Resolve a job's run directory from the index; `None` when the job
    /// is unknown or the directory is gone.
    pub fn run_folder(&self, job_id: &str) -> Option<PathBuf> {
        if job_id.is_empty() {
            return None;
        }
        let index = self.read_index();
        let path = index.get(job_id)?.as_str()?;
        let folder = PathBuf::from(path);
        folder.exists().then_some(folder)
    }

    fn update_index(&self, job_id: &JobId, run_dir: &Path) -> io::Result<()> {
        let mut index = self.read_index();
        index.insert(
            job_id.as_str().to_string(),
            serde_json::Value::String(run_dir.display().to_string()),
        );
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(index))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.runs_root.join(INDEX_FILE), body)
    }

    /// A corrupt or missing index degrades to empty rather than failing
    /// the run.
    fn read_index(&self) -> serde_json::Map<String, serde_json::Value> {
        let Ok(content) = fs::read_to_string(self.runs_root.join(INDEX_FILE)) else {
            return serde_json::Map::new();
        };
        match serde_json::from_str(&content) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                tracing::warn!(root = %self.runs_root.display(), "run index is corrupt; starting fresh");
                serde_json::Map::new()
            }
        }
    }
}

/// App and toolchain versions, platform, and optional accelerator
/// versions advertised by the environment.
fn environment_snapshot() -> serde_json::Value {
    let mut env = serde_json::Map::new();
    env.insert(
        "app".to_string(),
        serde_json::Value::String(env!("CARGO_PKG_VERSION").to_string()),
    );
    if let Some(rustc) = rustc_version() {
        env.insert("rustc".to_string(), serde_json::Value::String(rustc));
    }
    env.insert(
        "os".to_string(),
        serde_json::Value::String(std::env::consts::OS.to_string()),
    );
    env.insert(
        "arch".to_string(),
        serde_json::Value::String(std::env::consts::ARCH.to_string()),
    );
    for (key, name) in [("MILL_CUDA_VERSION", "cuda"), ("MILL_ONNXRUNTIME_VERSION", "onnxruntime")] {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                env.insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
    serde_json::Value::Object(env)
}

/// Toolchain version, best-effort.
fn rustc_version() -> Option<String> {
    let output = Command::new("rustc").arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

/// Current VCS revision, best-effort.
fn git_commit() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        None
    } else {
        Some(sha)
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
