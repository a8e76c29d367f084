// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mill_core::{Event, EventBus, JobId};
use mill_storage::{JobRegistry, JobStatus, JsonlEventStore, RegistryConfig};
use tempfile::tempdir;

#[test]
fn replay_reconstructs_without_reappending() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"type":"JobStarted","data":{"job_id":"j1","name":"task"}}"#, "\n",
            r#"{"type":"JobProgress","data":{"job_id":"j1","name":"task","progress":0.5,"message":"half"}}"#, "\n",
            r#"{"type":"JobLogLine","data":{"job_id":"j1","name":"task","line":"hello"}}"#, "\n",
            r#"{"type":"JobFinished","data":{"job_id":"j1","name":"task","result":null}}"#, "\n",
        ),
    )
    .unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    let bus = EventBus::new();
    let registry = JobRegistry::new(
        &bus,
        RegistryConfig::with_store(JsonlEventStore::new(&path)),
    );

    let record = registry.get("j1").unwrap();
    assert_eq!(record.status, JobStatus::Finished);
    assert_eq!(record.progress, 1.0);
    assert_eq!(record.message.as_deref(), Some("half"));
    assert_eq!(record.logs.last().map(String::as_str), Some("hello"));

    let after = std::fs::read_to_string(&path).unwrap();
    assert_eq!(before, after, "replay performed appends");
}

#[test]
fn replayed_state_matches_live_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.jsonl");

    // Live pass: feed events through a bus with a persisting registry.
    let live_snapshot = {
        let bus = EventBus::new();
        let registry = JobRegistry::new(
            &bus,
            RegistryConfig::with_store(JsonlEventStore::new(&path)),
        );
        let job_id = JobId::from_string("j1");
        bus.publish(&Event::JobStarted { job_id: job_id.clone(), name: "task".to_string() });
        bus.publish(&Event::JobProgress {
            job_id: job_id.clone(),
            name: "task".to_string(),
            progress: 0.5,
            message: Some("half".to_string()),
        });
        bus.publish(&Event::JobLogLine {
            job_id: job_id.clone(),
            name: "task".to_string(),
            line: "a\nb".to_string(),
        });
        bus.publish(&Event::JobFinished { job_id, name: "task".to_string(), result: None });
        registry.get("j1").unwrap()
    };

    // Replay pass: a fresh registry folds the journal.
    let bus = EventBus::new();
    let registry = JobRegistry::new(
        &bus,
        RegistryConfig::with_store(JsonlEventStore::new(&path)),
    );
    let replayed = registry.get("j1").unwrap();

    assert_eq!(replayed.status, live_snapshot.status);
    assert_eq!(replayed.name, live_snapshot.name);
    assert_eq!(replayed.progress, live_snapshot.progress);
    assert_eq!(replayed.message, live_snapshot.message);
    assert_eq!(replayed.logs, live_snapshot.logs);
}

#[test]
fn rotation_keeps_archive_count_bounded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.jsonl");
    let store = JsonlEventStore::with_limits(&path, 512, 3);

    for i in 0..300 {
        store.append(&Event::JobStarted {
            job_id: JobId::from_string(format!("job-{i}")),
            name: "padding-padding-padding-padding".to_string(),
        });
    }

    let archives = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != "registry.jsonl")
        .count();
    assert!(archives <= 3, "archive count {archives} exceeds max_archives");
}
