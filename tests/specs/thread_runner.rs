// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mill_core::{Event, EventBus, EventKind, JobError};
use mill_runner::{stdio, JobCtx, RetryPolicy, SubmitOpts, ThreadJobRunner};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;

fn record_job_events(bus: &Arc<EventBus>) -> Arc<Mutex<Vec<Event>>> {
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::JOB_KINDS {
        let sink = events.clone();
        bus.subscribe(kind, move |e| sink.lock().push(e.clone()));
    }
    events
}

#[test]
#[serial(capture)]
fn success_through_a_thread_runner() {
    let bus = Arc::new(EventBus::new());
    let events = record_job_events(&bus);
    let runner = ThreadJobRunner::new(bus.clone());

    let handle = runner.submit(
        "answer",
        |ctx: &JobCtx| {
            ctx.progress(0.5, Some("half"));
            Ok(42u32)
        },
        SubmitOpts::default(),
    );
    assert_eq!(handle.future.wait().unwrap(), 42);

    let events = events.lock();
    let mine: Vec<&Event> = events
        .iter()
        .filter(|e| e.job_id() == Some(&handle.job_id))
        .collect();

    assert!(matches!(mine[0], Event::JobStarted { .. }));
    assert!(matches!(
        mine[1],
        Event::JobProgress { progress, message, .. }
            if *progress == 0.0 && message.as_deref() == Some("started")
    ));
    assert!(matches!(
        mine[2],
        Event::JobProgress { progress, message, .. }
            if *progress == 0.5 && message.as_deref() == Some("half")
    ));
    assert!(matches!(
        mine[3],
        Event::JobProgress { progress, message, .. }
            if *progress == 1.0 && message.as_deref() == Some("finished")
    ));
    assert!(matches!(
        mine[4],
        Event::JobFinished { result, .. } if *result == Some(serde_json::json!(42))
    ));
    assert_eq!(mine.len(), 5);
}

#[test]
#[serial(capture)]
fn retry_then_success() {
    let bus = Arc::new(EventBus::new());
    let events = record_job_events(&bus);
    let runner = ThreadJobRunner::new(bus.clone());
    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let seen = attempts.clone();
    let handle = runner.submit(
        "flaky",
        move |_ctx: &JobCtx| {
            if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(JobError::integration("first attempt fails"))
            } else {
                Ok("ok".to_string())
            }
        },
        SubmitOpts::with_retry(RetryPolicy {
            retries: 3,
            backoff_sec: 0.01,
            jitter: 0.0,
            deadline_sec: None,
        }),
    );
    assert_eq!(handle.future.wait().unwrap(), "ok");

    let events = events.lock();
    let retrying: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|e| match e {
            Event::JobRetrying { attempt, max_attempts, .. } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(retrying, vec![(1, 4)]);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::JobFinished { result, .. } if *result == Some(serde_json::json!("ok"))
    )));
}

#[test]
#[serial(capture)]
fn validation_error_is_not_retried() {
    let bus = Arc::new(EventBus::new());
    let events = record_job_events(&bus);
    let runner = ThreadJobRunner::new(bus.clone());

    let handle = runner.submit(
        "invalid",
        |_ctx: &JobCtx| -> Result<(), JobError> { Err(JobError::validation("bad dataset path")) },
        SubmitOpts::with_retry(RetryPolicy::with_retries(3)),
    );
    assert!(handle.future.wait().is_err());

    let events = events.lock();
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::JobRetrying { .. })).count(),
        0
    );
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::JobFailed { .. })).count(),
        1
    );
}

#[test]
#[serial(capture)]
fn runner_shutdown_restores_output_capture() {
    assert!(!stdio::capture_installed());
    let bus = Arc::new(EventBus::new());
    let runner = ThreadJobRunner::new(bus);
    assert!(stdio::capture_installed());
    runner.shutdown();
    assert!(!stdio::capture_installed());
}
