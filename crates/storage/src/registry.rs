// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of background jobs (UI history, rerun, logs).
//!
//! - Keeps in-memory state for fast rendering.
//! - Optionally persists `Job*` events to a store and replays them on
//!   startup.
//! - Mirrors `Training*` events onto the same job lifecycle, so a
//!   training run appears as a job named `Training: <model>`.
//!
//! # Idempotency
//!
//! Replay may feed events the registry has already folded (a restart that
//! observes tail events twice). Handlers must therefore be idempotent:
//! a repeated `JobStarted` never resets accumulated progress or logs, and
//! a second terminal event is ignored.

use crate::record::{HookFn, JobRecord, JobStatus};
use crate::replay;
use crate::store::JsonlEventStore;
use indexmap::IndexMap;
use mill_core::{Clock, Event, EventBus, EventKind, JobId, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MAX_LOG_LINES: usize = 400;
pub const DEFAULT_MAX_JOBS: usize = 200;

pub struct RegistryConfig {
    pub max_log_lines: usize,
    pub max_jobs: usize,
    pub store: Option<JsonlEventStore>,
    pub replay_on_start: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_log_lines: DEFAULT_MAX_LOG_LINES,
            max_jobs: DEFAULT_MAX_JOBS,
            store: None,
            replay_on_start: true,
        }
    }
}

impl RegistryConfig {
    pub fn with_store(store: JsonlEventStore) -> Self {
        Self { store: Some(store), ..Self::default() }
    }
}

pub(crate) struct State {
    pub(crate) jobs: HashMap<String, JobRecord>,
    pending_rerun: IndexMap<String, HookFn>,
    pending_cancel: IndexMap<String, HookFn>,
    training_job: Option<JobId>,
}

pub(crate) struct Inner<C: Clock> {
    pub(crate) state: Mutex<State>,
    pub(crate) store: Option<JsonlEventStore>,
    max_log_lines: usize,
    max_jobs: usize,
    clock: C,
}

/// The authoritative in-memory view of all jobs.
pub struct JobRegistry<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl JobRegistry<SystemClock> {
    /// Subscribes to all job and training kinds immediately, then replays
    /// the store (when configured) so history is visible before any new
    /// submission. Live events published during replay are persisted
    /// normally; replayed events are not.
    pub fn new(bus: &EventBus, config: RegistryConfig) -> Self {
        Self::with_clock(bus, config, SystemClock)
    }
}

impl<C: Clock + 'static> JobRegistry<C> {
    pub fn with_clock(bus: &EventBus, config: RegistryConfig, clock: C) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                jobs: HashMap::new(),
                pending_rerun: IndexMap::new(),
                pending_cancel: IndexMap::new(),
                training_job: None,
            }),
            store: config.store,
            max_log_lines: config.max_log_lines,
            max_jobs: config.max_jobs,
            clock,
        });

        // Subscribe before replay: anything published while the store is
        // being read must land in the registry and the journal.
        for kind in EventKind::JOB_KINDS {
            let inner = inner.clone();
            bus.subscribe(kind, move |e| inner.apply_job(e, true));
        }
        for kind in EventKind::TRAINING_KINDS {
            let inner = inner.clone();
            bus.subscribe(kind, move |e| inner.on_training(e));
        }

        if config.replay_on_start && inner.store.is_some() {
            replay::replay_store(&inner);
        }

        Self { inner }
    }

    /// Snapshot of one job; `None` if unknown.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.inner.state.lock().jobs.get(job_id).cloned()
    }

    /// Snapshots of all jobs, newest `started_at` first.
    pub fn list(&self) -> Vec<JobRecord> {
        let state = self.inner.state.lock();
        let mut records: Vec<JobRecord> = state.jobs.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Attach a rerun hook. If the record does not exist yet (submit →
    /// start race) the hook is parked and attached at `JobStarted`.
    pub fn set_rerun(&self, job_id: &str, hook: HookFn) {
        if job_id.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        match state.jobs.get_mut(job_id) {
            Some(record) => record.rerun = Some(hook),
            None => {
                state.pending_rerun.insert(job_id.to_string(), hook);
                purge_pending(&mut state.pending_rerun, self.inner.max_jobs);
            }
        }
    }

    /// Attach a cancel hook; same pending semantics as [`set_rerun`].
    pub fn set_cancel(&self, job_id: &str, hook: HookFn) {
        if job_id.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        match state.jobs.get_mut(job_id) {
            Some(record) => record.cancel = Some(hook),
            None => {
                state.pending_cancel.insert(job_id.to_string(), hook);
                purge_pending(&mut state.pending_cancel, self.inner.max_jobs);
            }
        }
    }

    /// Drop all records and pending hooks, and clear the store.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.jobs.clear();
            state.pending_rerun.clear();
            state.pending_cancel.clear();
            state.training_job = None;
        }
        if let Some(store) = &self.inner.store {
            store.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_counts(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.pending_rerun.len(), state.pending_cancel.len())
    }
}

impl<C: Clock> Inner<C> {
    /// Fold one `Job*` event into the state; journal it when `persist`.
    pub(crate) fn apply_job(&self, event: &Event, persist: bool) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            match event {
                Event::JobStarted { job_id, name } => {
                    let key = job_id.as_str();
                    if let Some(record) = state.jobs.get_mut(key) {
                        // Idempotency: never reset progress/logs/status.
                        if !name.is_empty() {
                            record.name = name.clone();
                        }
                        if record.rerun.is_none() {
                            record.rerun = state.pending_rerun.shift_remove(key);
                        }
                        if record.cancel.is_none() {
                            record.cancel = state.pending_cancel.shift_remove(key);
                        }
                    } else {
                        let mut record =
                            JobRecord::new(job_id.clone(), name.clone(), self.clock.utc_now());
                        record.rerun = state.pending_rerun.shift_remove(key);
                        record.cancel = state.pending_cancel.shift_remove(key);
                        state.jobs.insert(key.to_string(), record);
                        self.purge_jobs(state);
                    }
                }

                Event::JobProgress { job_id, name, progress, message } => {
                    let record = self.ensure(state, job_id, name);
                    record.progress = *progress;
                    record.message = message.clone();
                }

                Event::JobLogLine { job_id, name, line } => {
                    let max = self.max_log_lines;
                    let record = self.ensure(state, job_id, name);
                    // Batched blocks split back into lines; trailing empty
                    // segments are dropped.
                    let mut segments: Vec<&str> = line.split('\n').collect();
                    while segments.last().is_some_and(|s| s.is_empty()) {
                        segments.pop();
                    }
                    record.logs.extend(segments.into_iter().map(str::to_string));
                    if record.logs.len() > max {
                        let drop = record.logs.len() - max;
                        record.logs.drain(..drop);
                    }
                }

                Event::JobRetrying { job_id, name, attempt, max_attempts, error } => {
                    let record = self.ensure(state, job_id, name);
                    if !record.status.is_terminal() {
                        record.status = JobStatus::Retrying;
                        record.message = Some(format!("retry {attempt}/{max_attempts}: {error}"));
                    }
                }

                Event::JobTimedOut { job_id, name, timeout_sec } => {
                    let now = self.clock.utc_now();
                    let record = self.ensure(state, job_id, name);
                    if !record.status.is_terminal() {
                        record.status = JobStatus::TimedOut;
                        record.error = Some(format!("timeout after {timeout_sec:.1}s"));
                        record.finished_at = Some(now);
                    }
                }

                Event::JobFinished { job_id, name, .. } => {
                    let now = self.clock.utc_now();
                    let record = self.ensure(state, job_id, name);
                    if !record.status.is_terminal() {
                        record.status = JobStatus::Finished;
                        record.progress = 1.0;
                        record.finished_at = Some(now);
                    }
                }

                Event::JobFailed { job_id, name, error } => {
                    let now = self.clock.utc_now();
                    let record = self.ensure(state, job_id, name);
                    if !record.status.is_terminal() {
                        record.status = JobStatus::Failed;
                        record.error = Some(error.clone());
                        record.finished_at = Some(now);
                    }
                }

                Event::JobCancelled { job_id, name } => {
                    let now = self.clock.utc_now();
                    let record = self.ensure(state, job_id, name);
                    if !record.status.is_terminal() {
                        record.status = JobStatus::Cancelled;
                        record.finished_at = Some(now);
                    }
                }

                _ => {}
            }
        }

        if persist {
            if let Some(store) = &self.store {
                store.append(event);
            }
        }
    }

    /// Map a training event onto the synthetic job lifecycle. The derived
    /// `Job*` events are applied and journaled but not republished on the
    /// bus; subscribers already saw the training original.
    fn on_training(&self, event: &Event) {
        match event {
            Event::TrainingStarted { model_name, .. } => {
                // A still-running prior training run is superseded.
                if let Some((job_id, name, progress)) = self.live_training() {
                    self.apply_job(
                        &Event::JobProgress {
                            job_id: job_id.clone(),
                            name: name.clone(),
                            progress,
                            message: Some("superseded by a new training run".to_string()),
                        },
                        true,
                    );
                    self.apply_job(&Event::JobCancelled { job_id, name }, true);
                }
                let job_id = JobId::new();
                self.state.lock().training_job = Some(job_id.clone());
                self.apply_job(
                    &Event::JobStarted { job_id, name: format!("Training: {model_name}") },
                    true,
                );
            }

            Event::TrainingProgress { fraction, message } => {
                if !fraction.is_finite() {
                    return;
                }
                if let Some((job_id, name, _)) = self.live_training() {
                    self.apply_job(
                        &Event::JobProgress {
                            job_id,
                            name,
                            progress: fraction.clamp(0.0, 1.0),
                            message: Some(message.clone()),
                        },
                        true,
                    );
                }
            }

            Event::TrainingFinished { best_weights_path } => {
                if let Some((job_id, name, _)) = self.take_training() {
                    let result = best_weights_path
                        .as_ref()
                        .map(|p| serde_json::Value::String(p.display().to_string()));
                    self.apply_job(&Event::JobFinished { job_id, name, result }, true);
                }
            }

            Event::TrainingFailed { error } => {
                if let Some((job_id, name, _)) = self.take_training() {
                    self.apply_job(
                        &Event::JobFailed { job_id, name, error: error.clone() },
                        true,
                    );
                }
            }

            Event::TrainingCancelled { message } => {
                if let Some((job_id, name, progress)) = self.take_training() {
                    // Surface the reason as the final progress message so
                    // replay preserves it.
                    self.apply_job(
                        &Event::JobProgress {
                            job_id: job_id.clone(),
                            name: name.clone(),
                            progress,
                            message: Some(message.clone()),
                        },
                        true,
                    );
                    self.apply_job(&Event::JobCancelled { job_id, name }, true);
                }
            }

            _ => {}
        }
    }

    /// The current training job if its record is still live.
    fn live_training(&self) -> Option<(JobId, String, f64)> {
        let state = self.state.lock();
        let job_id = state.training_job.clone()?;
        let record = state.jobs.get(job_id.as_str())?;
        if record.status.is_terminal() {
            return None;
        }
        Some((job_id, record.name.clone(), record.progress))
    }

    fn take_training(&self) -> Option<(JobId, String, f64)> {
        let found = self.live_training();
        if found.is_some() {
            self.state.lock().training_job = None;
        }
        found
    }

    fn ensure<'a>(&self, state: &'a mut State, job_id: &JobId, name: &str) -> &'a mut JobRecord {
        state
            .jobs
            .entry(job_id.as_str().to_string())
            .or_insert_with(|| JobRecord::new(job_id.clone(), name, self.clock.utc_now()))
    }

    /// Keep only the newest `max_jobs` records, oldest `started_at` first
    /// out the door.
    pub(crate) fn purge_jobs(&self, state: &mut State) {
        if self.max_jobs == 0 {
            return;
        }
        while state.jobs.len() > self.max_jobs {
            let oldest = state
                .jobs
                .values()
                .min_by_key(|r| r.started_at)
                .map(|r| r.job_id.as_str().to_string());
            match oldest {
                Some(key) => {
                    state.jobs.remove(&key);
                }
                None => break,
            }
        }
    }
}

fn purge_pending(pending: &mut IndexMap<String, HookFn>, cap: usize) {
    if cap == 0 {
        return;
    }
    while pending.len() > cap {
        pending.shift_remove_index(0);
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
