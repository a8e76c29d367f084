// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mill_core::{Event, EventBus};
use mill_storage::{JobRegistry, JobStatus, RegistryConfig};
use std::path::PathBuf;

#[test]
fn new_training_run_supersedes_running_one() {
    let bus = EventBus::new();
    let registry = JobRegistry::new(&bus, RegistryConfig::default());

    bus.publish(&Event::TrainingStarted {
        model_name: "m1".to_string(),
        epochs: 5,
        project: PathBuf::from("runs"),
    });
    let first_id = registry.list()[0].job_id.to_string();

    bus.publish(&Event::TrainingStarted {
        model_name: "m2".to_string(),
        epochs: 3,
        project: PathBuf::from("runs"),
    });

    let first = registry.get(&first_id).unwrap();
    assert_eq!(first.status, JobStatus::Cancelled);
    assert_eq!(
        first.message.as_deref(),
        Some("superseded by a new training run")
    );

    let jobs = registry.list();
    assert_eq!(jobs.len(), 2);
    let second = jobs
        .iter()
        .find(|r| r.job_id.as_str() != first_id)
        .unwrap();
    assert_eq!(second.name, "Training: m2");
    assert_eq!(second.status, JobStatus::Running);
    assert_ne!(second.job_id.to_string(), first_id);
}
