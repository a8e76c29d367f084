// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-mode entry point for the host binary.
//!
//! The supervisor re-invokes the application executable in worker mode;
//! the child resolves the task by name from a [`TaskRegistry`], runs it,
//! and reports through the stdout protocol. Task functions must be
//! top-level `fn` items so the parent can name them across the process
//! boundary.

use super::flag::CancelFlag;
use super::proto::ChildMessage;
use mill_core::error::panic_message;
use mill_core::JobError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Environment variables the supervisor sets for the child.
pub const ENV_TASK: &str = "MILL_JOB_TASK";
pub const ENV_CANCEL_FLAG: &str = "MILL_JOB_CANCEL_FLAG";

/// A process work unit: a named, top-level function.
pub type TaskFn = fn(&ChildCtx) -> Result<serde_json::Value, JobError>;

/// Named task table the worker child resolves tasks from.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, task: TaskFn) {
        self.tasks.insert(name.into(), task);
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }
}

/// Execution context handed to a task inside the worker child.
pub struct ChildCtx {
    payload: serde_json::Value,
    flag: CancelFlag,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ChildCtx {
    pub fn new(payload: serde_json::Value, flag: CancelFlag, out: Box<dyn Write + Send>) -> Self {
        Self { payload, flag, out: Mutex::new(out) }
    }

    /// Caller-provided task input.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_set()
    }

    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::cancelled("job cancelled"))
        } else {
            Ok(())
        }
    }

    /// Report progress to the parent. Clamped to [0, 1]; non-finite
    /// values are dropped here so they can never poison the protocol.
    pub fn progress(&self, fraction: f64, message: Option<&str>) {
        if !fraction.is_finite() {
            return;
        }
        self.send(&ChildMessage::Progress {
            value: fraction.clamp(0.0, 1.0),
            message: message.map(str::to_string),
        });
    }

    /// Emit one log line to the parent. Newlines split into separate
    /// messages; blank lines are dropped.
    pub fn log(&self, text: &str) {
        for line in text.split('\n') {
            if !line.trim().is_empty() {
                self.send(&ChildMessage::Log { line: line.to_string() });
            }
        }
    }

    fn send(&self, message: &ChildMessage) {
        if let Some(encoded) = message.encode() {
            let mut out = self.out.lock();
            let _ = writeln!(out, "{encoded}");
            let _ = out.flush();
        }
    }
}

/// Run one task against `out`, reporting the outcome through the protocol.
///
/// Always leaves exactly one terminal message (`result`, `error`, or
/// `cancelled`) on the stream, whatever the task does.
pub fn run_task(
    registry: &TaskRegistry,
    task_name: &str,
    payload: serde_json::Value,
    flag: CancelFlag,
    out: Box<dyn Write + Send>,
) {
    let ctx = ChildCtx::new(payload, flag, out);
    let Some(task) = registry.get(task_name) else {
        ctx.send(&ChildMessage::Error {
            message: format!("unknown task: {task_name:?}"),
        });
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| task(&ctx))) {
        Ok(Ok(value)) => ctx.send(&ChildMessage::Result { value }),
        Ok(Err(e)) if e.is_cancelled() => {
            ctx.send(&ChildMessage::Cancelled { reason: e.to_string() })
        }
        Ok(Err(e)) => ctx.send(&ChildMessage::Error {
            message: format!("{}: {}", e.kind, e),
        }),
        Err(panic) => ctx.send(&ChildMessage::Error {
            message: format!("task panicked: {}", panic_message(&panic)),
        }),
    }
}

/// Entry point the host binary calls when invoked in worker mode.
///
/// Reads the task name and cancel-flag path from the environment and the
/// payload as a single JSON line on stdin. Returns the process exit code.
pub fn child_main(registry: &TaskRegistry) -> i32 {
    let Ok(task_name) = std::env::var(ENV_TASK) else {
        tracing::error!("worker mode requires {ENV_TASK}");
        return 2;
    };
    let flag = match std::env::var(ENV_CANCEL_FLAG) {
        Ok(path) => CancelFlag::new(path),
        Err(_) => {
            tracing::error!("worker mode requires {ENV_CANCEL_FLAG}");
            return 2;
        }
    };

    let mut payload_line = String::new();
    let payload = match io::stdin().lock().read_line(&mut payload_line) {
        Ok(0) => serde_json::Value::Null,
        Ok(_) => serde_json::from_str(payload_line.trim()).unwrap_or(serde_json::Value::Null),
        Err(e) => {
            tracing::error!(error = %e, "failed to read task payload");
            return 2;
        }
    };

    run_task(
        registry,
        &task_name,
        payload,
        flag,
        Box::new(io::stdout()),
    );
    0
}

#[cfg(test)]
#[path = "child_tests.rs"]
mod tests;
