// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn started() -> Event {
    Event::JobStarted {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
    }
}

#[test]
fn test_serializes_with_type_and_data_framing() {
    let json = serde_json::to_value(started()).unwrap();
    assert_eq!(json["type"], "JobStarted");
    assert_eq!(json["data"]["job_id"], "j1");
    assert_eq!(json["data"]["name"], "task");
}

#[test]
fn test_progress_message_none_is_omitted() {
    let event = Event::JobProgress {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        progress: 0.5,
        message: None,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert!(json["data"].get("message").is_none());
}

#[test]
fn test_roundtrip_through_json() {
    let event = Event::JobRetrying {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        attempt: 2,
        max_attempts: 4,
        error: "boom".to_string(),
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn test_kind_matches_variant() {
    assert_eq!(started().kind(), EventKind::JobStarted);
    let cancelled = Event::TrainingCancelled {
        message: "stop".to_string(),
    };
    assert_eq!(cancelled.kind(), EventKind::TrainingCancelled);
}

#[test]
fn test_job_id_accessor_covers_job_variants_only() {
    assert_eq!(started().job_id().map(JobId::as_str), Some("j1"));
    let training = Event::TrainingProgress {
        fraction: 0.3,
        message: "step".to_string(),
    };
    assert!(training.job_id().is_none());
    assert!(training.job_name().is_none());
}

#[test]
fn test_terminal_variants() {
    let finished = Event::JobFinished {
        job_id: JobId::from_string("j1"),
        name: "task".to_string(),
        result: None,
    };
    assert!(finished.is_terminal());
    assert!(!started().is_terminal());
}

#[test]
fn test_job_kinds_cover_all_job_variants() {
    assert_eq!(EventKind::JOB_KINDS.len(), 8);
    assert_eq!(EventKind::TRAINING_KINDS.len(), 5);
}
