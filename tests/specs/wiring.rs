// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mill_app::Container;
use mill_runner::{JobCtx, SubmitOpts};
use mill_storage::JobStatus;
use serial_test::serial;
use tempfile::tempdir;

#[test]
#[serial(capture)]
fn registry_subscribes_before_first_submission() {
    let dir = tempdir().unwrap();
    let container = Container::new(dir.path());

    // A job this fast would vanish entirely if the runner accessor did
    // not resolve the registry first.
    let handle = container.thread_runner().submit(
        "quick",
        |ctx: &JobCtx| {
            ctx.progress(1.0, Some("done"));
            Ok(42u32)
        },
        SubmitOpts::default(),
    );
    assert_eq!(handle.future.wait().unwrap(), 42);

    let records = container.registry().list();
    assert!(!records.is_empty());
    assert_eq!(records[0].name, "quick");
    assert_eq!(records[0].status, JobStatus::Finished);
}

#[test]
#[serial(capture)]
fn jobs_submitted_through_container_are_journaled_and_replayable() {
    let dir = tempdir().unwrap();
    {
        let container = Container::new(dir.path());
        let handle = container.thread_runner().submit(
            "durable",
            |_ctx: &JobCtx| Ok(7u32),
            SubmitOpts::default(),
        );
        handle.future.wait().unwrap();
    }

    let container = Container::new(dir.path());
    let records = container.registry().list();
    assert_eq!(records[0].name, "durable");
    assert_eq!(records[0].status, JobStatus::Finished);
}
