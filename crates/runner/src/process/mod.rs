// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-based job runner.
//!
//! Why this exists:
//! - Threads cannot be force-killed safely.
//! - Heavy ML / integration tasks can hang in native code or blocking IO.
//!
//! Jobs run in a spawned child process so a hard timeout can terminate
//! them. The child streams progress and log lines back over a strict
//! stdout protocol; the parent republishes them on the event bus.
//! Cancellation is cooperative via a shared flag file, but timeout is
//! hard.

pub mod child;
pub mod flag;
pub mod proto;

pub use child::{child_main, run_task, ChildCtx, TaskFn, TaskRegistry};
pub use flag::CancelFlag;
pub use proto::ChildMessage;

use crate::batch::LogBatcher;
use crate::future::{result_channel, JobFuture};
use crate::pool::WorkerPool;
use crate::retry::SubmitOpts;
use mill_core::{Event, EventBus, JobError, JobId};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_SUPERVISORS: usize = 2;

const POLL_ALIVE: Duration = Duration::from_millis(150);
const POLL_EXITED: Duration = Duration::from_millis(30);

/// Queue feeder threads can flush messages shortly after the child is
/// already reported dead. The supervisor keeps polling for this window
/// so a terminal payload the child produced is not dropped.
const DRAIN_WINDOW: Duration = Duration::from_millis(300);

/// How the supervisor launches worker children.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Executable to spawn; normally the application binary itself.
    pub program: PathBuf,
    /// Leading arguments that switch the binary into worker mode.
    pub args: Vec<String>,
    /// Directory for per-job cancel flags.
    pub flag_dir: PathBuf,
}

impl WorkerSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            flag_dir: std::env::temp_dir(),
        }
    }

    /// Spec that re-invokes the current executable with a worker-mode flag.
    pub fn current_exe(worker_flag: &str) -> Result<Self, JobError> {
        let program = std::env::current_exe()
            .map_err(|e| JobError::infrastructure(format!("cannot locate own executable: {e}")))?;
        Ok(Self::new(program).arg(worker_flag))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_flag_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.flag_dir = dir.into();
        self
    }
}

/// Handle returned by [`ProcessJobRunner::submit`].
pub struct ProcessJobHandle {
    pub job_id: JobId,
    pub name: String,
    pub future: JobFuture<serde_json::Value>,
    flag: CancelFlag,
}

impl ProcessJobHandle {
    /// Signal cooperative cancellation; the supervisor also terminates
    /// the child if it is still alive at the next poll.
    pub fn cancel(&self) {
        self.flag.set();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.flag.clone()
    }
}

/// Runs named tasks in a separate process, supervised from a small
/// thread pool in the parent.
pub struct ProcessJobRunner {
    bus: Arc<EventBus>,
    spec: WorkerSpec,
    pool: Mutex<Option<WorkerPool>>,
}

impl ProcessJobRunner {
    pub fn new(bus: Arc<EventBus>, spec: WorkerSpec) -> Self {
        Self::with_supervisors(bus, spec, DEFAULT_SUPERVISORS)
    }

    pub fn with_supervisors(bus: Arc<EventBus>, spec: WorkerSpec, supervisors: usize) -> Self {
        Self {
            bus,
            spec,
            pool: Mutex::new(Some(WorkerPool::new(supervisors, "job-proc"))),
        }
    }

    /// Submit a named task with a JSON payload.
    ///
    /// `JobStarted` and the initial progress event are published
    /// synchronously before this returns.
    pub fn submit(
        &self,
        name: &str,
        task: &str,
        payload: serde_json::Value,
        opts: SubmitOpts,
    ) -> ProcessJobHandle {
        let job_id = JobId::new();
        let flag = CancelFlag::for_job(&self.spec.flag_dir, &job_id);
        let (promise, future) = result_channel::<serde_json::Value>();
        let handle = ProcessJobHandle {
            job_id: job_id.clone(),
            name: name.to_string(),
            future,
            flag: flag.clone(),
        };

        let pool = self.pool.lock();
        let Some(pool) = pool.as_ref() else {
            promise.complete(Err(JobError::unknown("process job runner is shut down")));
            return handle;
        };

        self.bus.publish(&Event::JobStarted {
            job_id: job_id.clone(),
            name: name.to_string(),
        });
        self.bus.publish(&Event::JobProgress {
            job_id: job_id.clone(),
            name: name.to_string(),
            progress: 0.0,
            message: Some("started".to_string()),
        });

        let bus = self.bus.clone();
        let spec = self.spec.clone();
        let name = name.to_string();
        let task = task.to_string();
        pool.execute(Box::new(move || {
            let attempt = AttemptCtx { bus, spec, job_id, name, task, payload, flag };
            attempt.run(&opts, promise);
        }));
        handle
    }

    /// Stop accepting jobs and join the supervisors.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().take();
        drop(pool);
    }
}

impl Drop for ProcessJobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Feed {
    Proto(String),
    Stderr(String),
}

enum Outcome {
    /// Timeout, supervisor-observed cancel, or child-reported cancel;
    /// the terminal event was already published.
    Fatal(JobError),
    /// The child stopped feeding; what it left behind.
    Finished {
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
}

struct AttemptCtx {
    bus: Arc<EventBus>,
    spec: WorkerSpec,
    job_id: JobId,
    name: String,
    task: String,
    payload: serde_json::Value,
    flag: CancelFlag,
}

impl AttemptCtx {
    fn run(&self, opts: &SubmitOpts, promise: crate::future::JobPromise<serde_json::Value>) {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.run_attempt(opts.timeout) {
                Ok(value) => {
                    self.publish_progress(1.0, Some("finished"));
                    let result = if value.is_null() { None } else { Some(value.clone()) };
                    self.bus.publish(&Event::JobFinished {
                        job_id: self.job_id.clone(),
                        name: self.name.clone(),
                        result,
                    });
                    self.flag.clear();
                    promise.complete(Ok(value));
                    return;
                }
                Err(e) if e.is_cancelled() || e.is_timeout() => {
                    // Terminal event already published where it fired.
                    self.flag.clear();
                    promise.complete(Err(e));
                    return;
                }
                Err(e) => {
                    if opts.retry.should_retry(&e, attempt, started) && !self.flag.is_set() {
                        self.bus.publish(&Event::JobRetrying {
                            job_id: self.job_id.clone(),
                            name: self.name.clone(),
                            attempt,
                            max_attempts: opts.retry.max_attempts(),
                            error: e.to_string(),
                        });
                        let delay = opts.retry.next_delay(attempt);
                        self.publish_progress(
                            opts.retry.retry_progress(attempt),
                            Some(&format!("retrying in {:.1}s", delay.as_secs_f64())),
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    self.bus.publish(&Event::JobFailed {
                        job_id: self.job_id.clone(),
                        name: self.name.clone(),
                        error: e.to_string(),
                    });
                    self.flag.clear();
                    promise.complete(Err(e));
                    return;
                }
            }
        }
    }

    fn run_attempt(&self, timeout: Option<Duration>) -> Result<serde_json::Value, JobError> {
        if self.flag.is_set() {
            self.publish_cancelled();
            return Err(JobError::cancelled("job cancelled"));
        }

        let mut child = self.spawn_child()?;
        let (feed_tx, feed) = mpsc::channel::<Feed>();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Feed::Proto, feed_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Feed::Stderr, feed_tx.clone());
        }
        drop(feed_tx);

        let mut batcher = LogBatcher::new(self.bus.clone(), self.job_id.clone(), &self.name);
        let outcome = self.supervise(&mut child, &feed, &mut batcher, timeout);

        // Cleanup runs on every exit path: terminate a still-living
        // child and reap it.
        let exit_code = cleanup_child(&mut child);
        batcher.flush(true);

        match outcome {
            Outcome::Fatal(e) => Err(e),
            Outcome::Finished { result, error } => {
                if self.flag.is_set() {
                    self.publish_cancelled();
                    return Err(JobError::cancelled("job cancelled"));
                }
                if let Some(message) = error {
                    return Err(JobError::unknown(message));
                }
                match result {
                    Some(value) => Ok(value),
                    None => match exit_code {
                        Some(code) if code != 0 => Err(JobError::unknown(format!(
                            "Job process exited with code {code} without a result payload"
                        ))),
                        _ => Err(JobError::unknown(
                            "Job process exited without a result payload",
                        )),
                    },
                }
            }
        }
    }

    fn spawn_child(&self) -> Result<Child, JobError> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .env(child::ENV_TASK, &self.task)
            .env(child::ENV_CANCEL_FLAG, self.flag.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut spawned = command
            .spawn()
            .map_err(|e| JobError::infrastructure(format!("failed to spawn job worker: {e}")))?;

        // Hand the payload over and close stdin so the child can start.
        if let Some(mut stdin) = spawned.stdin.take() {
            let payload = serde_json::to_string(&self.payload)
                .unwrap_or_else(|_| "null".to_string());
            let _ = writeln!(stdin, "{payload}");
        }
        Ok(spawned)
    }

    fn supervise(
        &self,
        child: &mut Child,
        feed: &mpsc::Receiver<Feed>,
        batcher: &mut LogBatcher,
        timeout: Option<Duration>,
    ) -> Outcome {
        let started = Instant::now();
        let mut drain_deadline: Option<Instant> = None;
        loop {
            if let Some(limit) = timeout {
                if started.elapsed() > limit {
                    self.flag.set();
                    kill_and_reap(child);
                    self.bus.publish(&Event::JobTimedOut {
                        job_id: self.job_id.clone(),
                        name: self.name.clone(),
                        timeout_sec: limit.as_secs_f64(),
                    });
                    return Outcome::Fatal(JobError::timeout(format!(
                        "job timed out after {}s",
                        limit.as_secs_f64()
                    )));
                }
            }

            let alive = child_is_alive(child);
            if self.flag.is_set() && alive {
                kill_and_reap(child);
                self.publish_cancelled();
                return Outcome::Fatal(JobError::cancelled("job cancelled"));
            }
            if !alive && drain_deadline.is_none() {
                drain_deadline = Some(Instant::now() + DRAIN_WINDOW);
            }

            let poll = if alive { POLL_ALIVE } else { POLL_EXITED };
            match feed.recv_timeout(poll) {
                Err(e) => {
                    if e == mpsc::RecvTimeoutError::Disconnected {
                        // Both pipes hit EOF; pace the loop by hand.
                        thread::sleep(poll);
                    }
                    if alive {
                        continue;
                    }
                    if let Some(deadline) = drain_deadline {
                        if Instant::now() < deadline {
                            continue;
                        }
                    }
                    return Outcome::Finished { result: None, error: None };
                }
                Ok(Feed::Stderr(line)) => batcher.add_line(&line),
                Ok(Feed::Proto(line)) => match proto::parse_line(&line) {
                    Err(message) => {
                        return Outcome::Finished { result: None, error: Some(message) }
                    }
                    Ok(ChildMessage::Progress { value, message }) => {
                        self.bus.publish(&Event::JobProgress {
                            job_id: self.job_id.clone(),
                            name: self.name.clone(),
                            progress: value.clamp(0.0, 1.0),
                            message,
                        });
                    }
                    Ok(ChildMessage::Log { line }) => batcher.add_line(&line),
                    Ok(ChildMessage::Result { value }) => {
                        return Outcome::Finished { result: Some(value), error: None }
                    }
                    Ok(ChildMessage::Error { message }) => {
                        return Outcome::Finished { result: None, error: Some(message) }
                    }
                    Ok(ChildMessage::Cancelled { reason }) => {
                        tracing::info!(job_id = %self.job_id, reason, "job cancelled by child");
                        self.publish_cancelled();
                        return Outcome::Fatal(JobError::cancelled("job cancelled"));
                    }
                },
            }
        }
    }

    fn publish_progress(&self, fraction: f64, message: Option<&str>) {
        self.bus.publish(&Event::JobProgress {
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            progress: fraction.clamp(0.0, 1.0),
            message: message.map(str::to_string),
        });
    }

    fn publish_cancelled(&self) {
        self.bus.publish(&Event::JobCancelled {
            job_id: self.job_id.clone(),
            name: self.name.clone(),
        });
    }
}

fn spawn_reader<R>(source: R, wrap: fn(String) -> Feed, tx: mpsc::Sender<Feed>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("job-proc-feed".to_string())
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(wrap(line)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn pipe reader thread");
    }
}

fn child_is_alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Terminate a still-living child and return its exit code.
fn cleanup_child(child: &mut Child) -> Option<i32> {
    if child_is_alive(child) {
        let _ = child.kill();
    }
    match child.wait() {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to reap job worker");
            None
        }
    }
}

#[cfg(all(test, unix))]
#[path = "runner_tests.rs"]
mod tests;
