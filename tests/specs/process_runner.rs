// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg(unix)]

use mill_core::{Event, EventBus, EventKind};
use mill_runner::process::WorkerSpec;
use mill_runner::{ProcessJobRunner, SubmitOpts};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn record_job_events(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<Event>>> {
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::JOB_KINDS {
        let sink = events.clone();
        bus.subscribe(kind, move |e| sink.lock().push(e.clone()));
    }
    events
}

fn sh_runner(script: &str) -> (TempDir, ProcessJobRunner, Arc<Mutex<Vec<Event>>>) {
    let dir = tempdir().unwrap();
    let bus = Arc::new(EventBus::new());
    let events = record_job_events(&bus);
    let spec = WorkerSpec::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .with_flag_dir(dir.path());
    (dir, ProcessJobRunner::new(bus, spec), events)
}

fn failed_errors(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::JobFailed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn child_exits_cleanly_without_payload() {
    let (_dir, runner, events) = sh_runner("exit 0");
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    let err = handle.future.wait().unwrap_err();
    assert_eq!(err.message, "Job process exited without a result payload");
    assert_eq!(
        failed_errors(&events.lock()),
        vec!["Job process exited without a result payload".to_string()]
    );
}

#[test]
fn child_exits_with_code_without_payload() {
    let (_dir, runner, _events) = sh_runner("exit 137");
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    let err = handle.future.wait().unwrap_err();
    assert_eq!(
        err.message,
        "Job process exited with code 137 without a result payload"
    );
}

#[test]
fn malformed_progress_payload_is_fatal() {
    let script =
        r#"printf '%s\n' '{"kind":"progress","value":"not-a-number","message":null}'; sleep 1"#;
    let (_dir, runner, events) = sh_runner(script);
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    assert!(handle.future.wait().is_err());
    let errors = failed_errors(&events.lock());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Malformed child progress payload"));
}

#[test]
fn non_finite_progress_payload_is_fatal() {
    // JSON cannot carry NaN; a null value is the closest wire analog and
    // must be rejected the same way.
    let script = r#"printf '%s\n' '{"kind":"progress","value":null,"message":"x"}'; sleep 1"#;
    let (_dir, runner, events) = sh_runner(script);
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    assert!(handle.future.wait().is_err());
    let errors = failed_errors(&events.lock());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Malformed child progress payload"));
}

#[test]
fn unknown_message_kind_is_fatal() {
    let script = r#"printf '%s\n' '{"kind":"mystery"}'; sleep 1"#;
    let (_dir, runner, events) = sh_runner(script);
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    assert!(handle.future.wait().is_err());
    let errors = failed_errors(&events.lock());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Unknown child message kind"));
}

#[test]
fn late_result_after_child_exit_is_drained() {
    let script = r#"( sleep 0.2; printf '%s\n' '{"kind":"result","value":"ok"}' ) &"#;
    let (_dir, runner, events) = sh_runner(script);
    let handle = runner.submit("proc", "noop", serde_json::Value::Null, SubmitOpts::default());

    assert_eq!(handle.future.wait().unwrap(), serde_json::json!("ok"));

    let events = events.lock();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobFinished { result, .. } if *result == Some(serde_json::json!("ok"))
    )));
    assert!(!events.iter().any(|e| matches!(e, Event::JobFailed { .. })));
}
