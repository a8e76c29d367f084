// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mill_core::FakeClock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::tempdir;

fn registry() -> (EventBus, JobRegistry) {
    let bus = EventBus::new();
    let registry = JobRegistry::new(&bus, RegistryConfig::default());
    (bus, registry)
}

fn started(job_id: &str, name: &str) -> Event {
    Event::JobStarted {
        job_id: JobId::from_string(job_id),
        name: name.to_string(),
    }
}

fn progress(job_id: &str, fraction: f64, message: Option<&str>) -> Event {
    Event::JobProgress {
        job_id: JobId::from_string(job_id),
        name: "task".to_string(),
        progress: fraction,
        message: message.map(str::to_string),
    }
}

fn log_line(job_id: &str, line: &str) -> Event {
    Event::JobLogLine {
        job_id: JobId::from_string(job_id),
        name: "task".to_string(),
        line: line.to_string(),
    }
}

#[test]
fn test_started_creates_running_record() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));

    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.name, "task");
    assert_eq!(record.progress, 0.0);
}

#[test]
fn test_duplicate_started_does_not_reset_state() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));
    bus.publish(&progress("j1", 0.7, Some("deep")));
    bus.publish(&log_line("j1", "kept"));

    bus.publish(&started("j1", "renamed"));

    let record = registry.get("j1").unwrap();
    assert_eq!(record.name, "renamed");
    assert_eq!(record.progress, 0.7);
    assert_eq!(record.logs, vec!["kept".to_string()]);
    assert_eq!(record.status, JobStatus::Running);
}

#[test]
fn test_lifecycle_statuses() {
    let (bus, registry) = registry();

    bus.publish(&started("j1", "task"));
    bus.publish(&Event::JobRetrying {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        attempt: 1,
        max_attempts: 4,
        error: "flaky".to_string(),
    });
    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::Retrying);
    assert_eq!(record.message.as_deref(), Some("retry 1/4: flaky"));

    bus.publish(&Event::JobFinished {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        result: None,
    });
    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::Finished);
    assert_eq!(record.progress, 1.0);
    assert!(record.finished_at.is_some());
}

#[test]
fn test_progress_does_not_leave_retrying() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));
    bus.publish(&Event::JobRetrying {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        attempt: 1,
        max_attempts: 2,
        error: "x".to_string(),
    });
    bus.publish(&progress("j1", 0.1, Some("retrying in 0.8s")));

    assert_eq!(registry.get("j1").unwrap().status, JobStatus::Retrying);
}

#[test]
fn test_timed_out_and_failed_set_error() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));
    bus.publish(&Event::JobTimedOut {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        timeout_sec: 2.5,
    });
    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::TimedOut);
    assert_eq!(record.error.as_deref(), Some("timeout after 2.5s"));

    bus.publish(&started("j2", "task"));
    bus.publish(&Event::JobFailed {
        job_id: JobId::from_string("j2"),
        name: "task".to_string(),
        error: "boom".to_string(),
    });
    assert_eq!(registry.get("j2").unwrap().error.as_deref(), Some("boom"));
}

#[test]
fn test_first_terminal_event_wins() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));
    bus.publish(&Event::JobCancelled {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
    });
    bus.publish(&Event::JobFinished {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        result: None,
    });
    bus.publish(&Event::JobFailed {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        error: "late".to_string(),
    });

    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.error.is_none());
}

#[test]
fn test_batched_log_blocks_are_split_and_capped() {
    let bus = EventBus::new();
    let registry = JobRegistry::new(
        &bus,
        RegistryConfig { max_log_lines: 5, ..RegistryConfig::default() },
    );
    bus.publish(&started("j1", "task"));
    bus.publish(&log_line("j1", "a\nb\nc\n"));
    bus.publish(&log_line("j1", "d\ne\nf\ng"));

    let record = registry.get("j1").unwrap();
    assert_eq!(
        record.logs,
        vec!["c", "d", "e", "f", "g"].into_iter().map(String::from).collect::<Vec<_>>()
    );
}

#[test]
fn test_snapshots_are_copies() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));
    bus.publish(&log_line("j1", "original"));

    let mut snapshot = registry.get("j1").unwrap();
    snapshot.logs.push("tampered".to_string());
    snapshot.name = "tampered".to_string();

    let fresh = registry.get("j1").unwrap();
    assert_eq!(fresh.logs, vec!["original".to_string()]);
    assert_eq!(fresh.name, "task");
}

#[test]
fn test_list_orders_newest_first() {
    let bus = EventBus::new();
    let clock = FakeClock::new();
    let registry = JobRegistry::with_clock(&bus, RegistryConfig::default(), clock.clone());

    bus.publish(&started("old", "task"));
    clock.advance(Duration::from_secs(10));
    bus.publish(&started("new", "task"));

    let names: Vec<String> = registry.list().into_iter().map(|r| r.job_id.to_string()).collect();
    assert_eq!(names, vec!["new".to_string(), "old".to_string()]);
}

#[test]
fn test_oldest_jobs_are_evicted_past_cap() {
    let bus = EventBus::new();
    let clock = FakeClock::new();
    let registry = JobRegistry::with_clock(
        &bus,
        RegistryConfig { max_jobs: 2, ..RegistryConfig::default() },
        clock.clone(),
    );

    for id in ["a", "b", "c"] {
        bus.publish(&started(id, "task"));
        clock.advance(Duration::from_secs(1));
    }

    assert!(registry.get("a").is_none());
    assert!(registry.get("b").is_some());
    assert!(registry.get("c").is_some());
}

#[test]
fn test_rerun_hook_set_before_start_attaches_on_start() {
    let (bus, registry) = registry();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    registry.set_rerun("j1", Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    bus.publish(&started("j1", "task"));

    let record = registry.get("j1").unwrap();
    record.rerun.as_ref().unwrap()();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_hook_set_after_start_attaches_directly() {
    let (bus, registry) = registry();
    bus.publish(&started("j1", "task"));

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    registry.set_cancel("j1", Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let record = registry.get("j1").unwrap();
    record.cancel.as_ref().unwrap()();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_hook_setters_ignore_empty_job_id() {
    let (_bus, registry) = registry();
    registry.set_rerun("", Arc::new(|| {}));
    registry.set_cancel("", Arc::new(|| {}));
    assert_eq!(registry.pending_counts(), (0, 0));
}

#[test]
fn test_pending_hooks_are_bounded_by_max_jobs() {
    let bus = EventBus::new();
    let registry = JobRegistry::new(
        &bus,
        RegistryConfig { max_jobs: 2, ..RegistryConfig::default() },
    );

    for id in ["a", "b", "c"] {
        registry.set_rerun(id, Arc::new(|| {}));
        registry.set_cancel(id, Arc::new(|| {}));
    }

    let (rerun, cancel) = registry.pending_counts();
    assert!(rerun <= 2);
    assert!(cancel <= 2);
}

#[test]
fn test_clear_drops_records_and_store() {
    let dir = tempdir().unwrap();
    let bus = EventBus::new();
    let store = JsonlEventStore::new(dir.path().join("registry.jsonl"));
    let registry = JobRegistry::new(&bus, RegistryConfig::with_store(store));

    bus.publish(&started("j1", "task"));
    assert!(registry.get("j1").is_some());

    registry.clear();
    assert!(registry.list().is_empty());
    assert!(!dir.path().join("registry.jsonl").exists());
}

// -- training bridge --

fn training_started(model: &str) -> Event {
    Event::TrainingStarted {
        model_name: model.to_string(),
        epochs: 10,
        project: PathBuf::from("runs"),
    }
}

#[test]
fn test_training_events_map_to_a_job() {
    let (bus, registry) = registry();

    bus.publish(&training_started("yolo11n.pt"));
    bus.publish(&Event::TrainingProgress {
        fraction: 0.4,
        message: "step".to_string(),
    });

    let jobs = registry.list();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].name.starts_with("Training:"));
    assert_eq!(jobs[0].progress, 0.4);
    assert_eq!(jobs[0].status, JobStatus::Running);

    bus.publish(&Event::TrainingFinished { best_weights_path: None });
    assert_eq!(registry.list()[0].status, JobStatus::Finished);
}

#[test]
fn test_training_cancelled_surfaces_reason_message() {
    let (bus, registry) = registry();
    bus.publish(&training_started("m"));
    bus.publish(&Event::TrainingCancelled { message: "user stop".to_string() });

    let record = &registry.list()[0];
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.message.as_deref(), Some("user stop"));
}

#[test]
fn test_training_failed_marks_job_failed() {
    let (bus, registry) = registry();
    bus.publish(&training_started("m"));
    bus.publish(&Event::TrainingFailed { error: "cuda out of memory".to_string() });

    let record = &registry.list()[0];
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("cuda out of memory"));
}

#[test]
fn test_quick_training_restarts_get_unique_ids() {
    let (bus, registry) = registry();
    bus.publish(&training_started("m1"));
    bus.publish(&Event::TrainingCancelled { message: "stop".to_string() });
    bus.publish(&training_started("m2"));

    let ids: Vec<String> = registry.list().into_iter().map(|r| r.job_id.to_string()).collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn test_new_training_supersedes_running_one() {
    let bus = EventBus::new();
    let clock = FakeClock::new();
    let registry = JobRegistry::with_clock(&bus, RegistryConfig::default(), clock.clone());

    bus.publish(&training_started("m1"));
    let first_id = registry.list()[0].job_id.to_string();
    clock.advance(Duration::from_secs(1));
    bus.publish(&training_started("m2"));

    let first = registry.get(&first_id).unwrap();
    assert_eq!(first.status, JobStatus::Cancelled);
    assert_eq!(
        first.message.as_deref(),
        Some("superseded by a new training run")
    );

    let jobs = registry.list();
    assert_eq!(jobs[0].name, "Training: m2");
    assert_eq!(jobs[0].status, JobStatus::Running);
}

#[test]
fn test_training_events_are_persisted_as_job_events() {
    let dir = tempdir().unwrap();
    let bus = EventBus::new();
    let store = JsonlEventStore::new(dir.path().join("registry.jsonl"));
    let registry = JobRegistry::new(&bus, RegistryConfig::with_store(store));

    bus.publish(&training_started("yolo11n.pt"));
    bus.publish(&Event::TrainingProgress { fraction: 0.5, message: "mid".to_string() });
    bus.publish(&Event::TrainingFinished { best_weights_path: None });

    assert_eq!(registry.list()[0].status, JobStatus::Finished);

    let store = JsonlEventStore::new(dir.path().join("registry.jsonl"));
    let types: Vec<String> = store
        .load()
        .into_iter()
        .filter_map(|r| r["type"].as_str().map(str::to_string))
        .collect();
    assert!(types.contains(&"JobStarted".to_string()));
    assert!(types.contains(&"JobProgress".to_string()));
    assert!(types.contains(&"JobFinished".to_string()));
}

#[test]
fn test_training_cancel_reason_reaches_the_journal() {
    let dir = tempdir().unwrap();
    let bus = EventBus::new();
    let store = JsonlEventStore::new(dir.path().join("registry.jsonl"));
    let _registry = JobRegistry::new(&bus, RegistryConfig::with_store(store));

    bus.publish(&training_started("m"));
    bus.publish(&Event::TrainingProgress { fraction: 0.25, message: "warmup".to_string() });
    bus.publish(&Event::TrainingCancelled { message: "user stop".to_string() });

    let store = JsonlEventStore::new(dir.path().join("registry.jsonl"));
    let progress_messages: Vec<String> = store
        .load()
        .into_iter()
        .filter(|r| r["type"] == "JobProgress")
        .filter_map(|r| r["data"]["message"].as_str().map(str::to_string))
        .collect();
    assert!(progress_messages.contains(&"user stop".to_string()));
}
