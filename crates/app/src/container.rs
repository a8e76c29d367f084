// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root.
//!
//! The UI should not construct infrastructure services directly; this
//! container wires concrete implementations and owns their lifetimes.
//! Accessors are lazy and idempotent, and runner accessors always touch
//! the registry accessor first — the registry must be subscribed to the
//! bus before the first `JobStarted` is published, or a short-lived job
//! can finish before anyone is listening and the jobs view stays empty.

use mill_config::{load_config, state_dir, JobsPolicy};
use mill_core::EventBus;
use mill_runner::process::WorkerSpec;
use mill_runner::{ProcessJobRunner, ThreadJobRunner};
use mill_storage::{JobRegistry, JsonlEventStore, RegistryConfig, RunManifestWriter};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const INTEGRATIONS_CONFIG_FILE: &str = "integrations_config.json";

/// Resolves the job-core services. Single place to swap implementations.
pub struct Container {
    project_root: PathBuf,
    worker_spec: Option<WorkerSpec>,
    bus: Arc<EventBus>,
    registry: Mutex<Option<Arc<JobRegistry>>>,
    thread_runner: Mutex<Option<Arc<ThreadJobRunner>>>,
    process_runner: Mutex<Option<Arc<ProcessJobRunner>>>,
    manifests: Mutex<Option<Arc<RunManifestWriter>>>,
}

impl Container {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            worker_spec: None,
            bus: Arc::new(EventBus::new()),
            registry: Mutex::new(None),
            thread_runner: Mutex::new(None),
            process_runner: Mutex::new(None),
            manifests: Mutex::new(None),
        }
    }

    /// Configure how worker children are spawned for the process runner.
    pub fn with_worker_spec(mut self, spec: WorkerSpec) -> Self {
        self.worker_spec = Some(spec);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.project_root)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        let mut slot = self.registry.lock();
        slot.get_or_insert_with(|| {
            let store = JsonlEventStore::new(self.state_dir().join("jobs/registry.jsonl"));
            Arc::new(JobRegistry::new(&self.bus, RegistryConfig::with_store(store)))
        })
        .clone()
    }

    /// Shared background job runner (thread pool) for long-running tasks.
    pub fn thread_runner(&self) -> Arc<ThreadJobRunner> {
        // Ensure the registry subscribes to the bus before the first
        // JobStarted publish. Some jobs are very short-lived; if the
        // registry is created after submit(), the jobs view can miss
        // every event and appear empty.
        let _ = self.registry();
        let mut slot = self.thread_runner.lock();
        slot.get_or_insert_with(|| Arc::new(ThreadJobRunner::new(self.bus.clone())))
            .clone()
    }

    /// Background process runner for CPU-heavy / isolated jobs.
    pub fn process_runner(&self) -> Arc<ProcessJobRunner> {
        // Same ordering guarantee as thread_runner().
        let _ = self.registry();
        let mut slot = self.process_runner.lock();
        slot.get_or_insert_with(|| {
            let spec = self
                .worker_spec
                .clone()
                .or_else(|| WorkerSpec::current_exe("--job-worker").ok())
                .unwrap_or_else(|| WorkerSpec::new("mill-worker"))
                .with_flag_dir(self.state_dir().join("jobs/flags"));
            Arc::new(ProcessJobRunner::new(self.bus.clone(), spec))
        })
        .clone()
    }

    pub fn manifests(&self) -> Arc<RunManifestWriter> {
        let mut slot = self.manifests.lock();
        slot.get_or_insert_with(|| Arc::new(RunManifestWriter::new(self.state_dir())))
            .clone()
    }

    /// The jobs policy from the shared integrations config, normalized.
    pub fn jobs_policy(&self) -> JobsPolicy {
        let config = load_config(&self.state_dir().join(INTEGRATIONS_CONFIG_FILE));
        JobsPolicy::from_value(&config["jobs"])
    }
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
