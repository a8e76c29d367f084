// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-pool job runner that publishes lifecycle events to the bus.
//!
//! Cancellation is cooperative only: `cancel()` sets the token and the job
//! function is expected to observe it. The soft timeout runs the function
//! in a helper thread and gives up waiting at the deadline; the helper may
//! keep running in the background, which is an accepted limitation of this
//! runner (the process runner exists for work that must be killable).

use crate::batch::LogBatcher;
use crate::future::{result_channel, JobFuture};
use crate::pool::WorkerPool;
use crate::retry::SubmitOpts;
use crate::stdio::{self, CaptureGuard, JobWriter};
use crate::token::CancelToken;
use mill_core::error::panic_message;
use mill_core::{Event, EventBus, JobError, JobId};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_WORKERS: usize = 4;

/// Context handed to a job function.
pub struct JobCtx {
    job_id: JobId,
    name: String,
    token: CancelToken,
    bus: Arc<EventBus>,
    writer: JobWriter,
    batcher: Arc<Mutex<LogBatcher>>,
}

impl JobCtx {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Convenience for cancellation checks at safe points.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::cancelled("job cancelled"))
        } else {
            Ok(())
        }
    }

    /// Publish a progress update. The fraction is clamped to [0, 1];
    /// non-finite values are rejected.
    pub fn progress(&self, fraction: f64, message: Option<&str>) {
        if !fraction.is_finite() {
            tracing::warn!(job_id = %self.job_id, fraction, "non-finite progress rejected");
            return;
        }
        self.bus.publish(&Event::JobProgress {
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            progress: fraction.clamp(0.0, 1.0),
            message: message.map(str::to_string),
        });
    }

    /// Emit one log line through the job's batcher.
    pub fn log(&self, line: &str) {
        self.batcher.lock().add_line(line);
    }

    /// Line-splitting writer attributed to this job.
    pub fn writer(&self) -> JobWriter {
        self.writer.clone()
    }

    fn flush_logs(&self) {
        self.writer.flush_residual();
        self.batcher.lock().flush(true);
    }
}

/// Handle returned by [`ThreadJobRunner::submit`].
pub struct JobHandle<T> {
    pub job_id: JobId,
    pub name: String,
    pub future: JobFuture<T>,
    token: CancelToken,
}

impl<T> JobHandle<T> {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// ThreadPool job runner that publishes lifecycle events to an [`EventBus`].
pub struct ThreadJobRunner {
    bus: Arc<EventBus>,
    pool: Mutex<Option<WorkerPool>>,
    capture: Mutex<Option<CaptureGuard>>,
}

impl ThreadJobRunner {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_workers(bus, DEFAULT_WORKERS)
    }

    pub fn with_workers(bus: Arc<EventBus>, workers: usize) -> Self {
        Self {
            bus,
            pool: Mutex::new(Some(WorkerPool::new(workers, "job"))),
            capture: Mutex::new(Some(stdio::install_capture())),
        }
    }

    /// Submit a job for execution.
    ///
    /// `JobStarted` and the initial progress event are published
    /// synchronously before this returns, so short-lived jobs cannot race
    /// past a subscriber that was wired first.
    pub fn submit<T, F>(&self, name: &str, job: F, opts: SubmitOpts) -> JobHandle<T>
    where
        T: Serialize + Send + 'static,
        F: Fn(&JobCtx) -> Result<T, JobError> + Send + Sync + 'static,
    {
        let job_id = JobId::new();
        let token = CancelToken::new();
        let batcher = Arc::new(Mutex::new(LogBatcher::new(
            self.bus.clone(),
            job_id.clone(),
            name,
        )));
        let writer = {
            let batcher = batcher.clone();
            JobWriter::new(Arc::new(move |line: &str| batcher.lock().add_line(line)))
        };
        let ctx = Arc::new(JobCtx {
            job_id: job_id.clone(),
            name: name.to_string(),
            token: token.clone(),
            bus: self.bus.clone(),
            writer,
            batcher,
        });

        let (promise, future) = result_channel::<T>();
        let handle = JobHandle {
            job_id: job_id.clone(),
            name: name.to_string(),
            future,
            token,
        };

        let pool = self.pool.lock();
        let Some(pool) = pool.as_ref() else {
            promise.complete(Err(JobError::unknown("job runner is shut down")));
            return handle;
        };

        self.bus.publish(&Event::JobStarted {
            job_id: job_id.clone(),
            name: name.to_string(),
        });
        ctx.progress(0.0, Some("started"));

        let bus = self.bus.clone();
        let job = Arc::new(job);
        pool.execute(Box::new(move || {
            run_job(&bus, &ctx, &job, &opts, promise);
        }));
        handle
    }

    /// Stop accepting jobs, join the workers, and uninstall output capture
    /// so process-wide streams behave as before construction.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().take();
        drop(pool);
        let capture = self.capture.lock().take();
        drop(capture);
    }
}

impl Drop for ThreadJobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job<T, F>(
    bus: &Arc<EventBus>,
    ctx: &Arc<JobCtx>,
    job: &Arc<F>,
    opts: &SubmitOpts,
    promise: crate::future::JobPromise<T>,
) where
    T: Serialize + Send + 'static,
    F: Fn(&JobCtx) -> Result<T, JobError> + Send + Sync + 'static,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match run_attempt(bus, ctx, job, opts.timeout) {
            Ok(value) => {
                ctx.flush_logs();
                if ctx.is_cancelled() {
                    publish_cancelled(bus, ctx);
                    promise.complete(Err(JobError::cancelled("job cancelled")));
                    return;
                }
                ctx.progress(1.0, Some("finished"));
                bus.publish(&Event::JobFinished {
                    job_id: ctx.job_id.clone(),
                    name: ctx.name.clone(),
                    result: serde_json::to_value(&value).ok().filter(|v| !v.is_null()),
                });
                promise.complete(Ok(value));
                return;
            }
            Err(e) if e.is_cancelled() => {
                ctx.flush_logs();
                publish_cancelled(bus, ctx);
                promise.complete(Err(e));
                return;
            }
            Err(e) if e.is_timeout() => {
                // JobTimedOut was published where the deadline fired.
                ctx.flush_logs();
                promise.complete(Err(e));
                return;
            }
            Err(e) => {
                ctx.flush_logs();
                if ctx.is_cancelled() {
                    publish_cancelled(bus, ctx);
                    promise.complete(Err(JobError::cancelled("job cancelled")));
                    return;
                }
                if opts.retry.should_retry(&e, attempt, started) {
                    bus.publish(&Event::JobRetrying {
                        job_id: ctx.job_id.clone(),
                        name: ctx.name.clone(),
                        attempt,
                        max_attempts: opts.retry.max_attempts(),
                        error: e.to_string(),
                    });
                    let delay = opts.retry.next_delay(attempt);
                    ctx.progress(
                        opts.retry.retry_progress(attempt),
                        Some(&format!("retrying in {:.1}s", delay.as_secs_f64())),
                    );
                    thread::sleep(delay);
                    continue;
                }
                bus.publish(&Event::JobFailed {
                    job_id: ctx.job_id.clone(),
                    name: ctx.name.clone(),
                    error: e.to_string(),
                });
                promise.complete(Err(e));
                return;
            }
        }
    }
}

fn publish_cancelled(bus: &Arc<EventBus>, ctx: &JobCtx) {
    bus.publish(&Event::JobCancelled {
        job_id: ctx.job_id.clone(),
        name: ctx.name.clone(),
    });
}

fn run_attempt<T, F>(
    bus: &Arc<EventBus>,
    ctx: &Arc<JobCtx>,
    job: &Arc<F>,
    timeout: Option<Duration>,
) -> Result<T, JobError>
where
    T: Serialize + Send + 'static,
    F: Fn(&JobCtx) -> Result<T, JobError> + Send + Sync + 'static,
{
    if ctx.is_cancelled() {
        return Err(JobError::cancelled("job cancelled"));
    }

    let Some(limit) = timeout else {
        // Fast path: no timeout requested, run directly on this worker.
        let _sink = stdio::set_thread_sink(ctx.writer());
        return run_guarded(job.as_ref(), ctx);
    };

    // Best-effort timeout: run the job in a helper thread so we can give
    // up waiting at the deadline.
    let (tx, rx) = mpsc::channel();
    let job = job.clone();
    let helper_ctx = ctx.clone();
    let spawned = thread::Builder::new()
        .name(format!("job-inner-{}", ctx.job_id.short(8)))
        .spawn(move || {
            let _sink = stdio::set_thread_sink(helper_ctx.writer());
            let _ = tx.send(run_guarded(job.as_ref(), &helper_ctx));
        });
    if let Err(e) = spawned {
        return Err(JobError::infrastructure(format!(
            "failed to spawn timeout helper thread: {e}"
        )));
    }

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            // Ask the job to stop; the helper thread may keep running.
            ctx.token.cancel();
            bus.publish(&Event::JobTimedOut {
                job_id: ctx.job_id.clone(),
                name: ctx.name.clone(),
                timeout_sec: limit.as_secs_f64(),
            });
            Err(JobError::timeout(format!(
                "job timed out after {}s",
                limit.as_secs_f64()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(JobError::unknown("job helper thread exited without a result"))
        }
    }
}

fn run_guarded<T, F>(job: &F, ctx: &JobCtx) -> Result<T, JobError>
where
    F: Fn(&JobCtx) -> Result<T, JobError>,
{
    match catch_unwind(AssertUnwindSafe(|| job(ctx))) {
        Ok(result) => result,
        Err(panic) => Err(JobError::unknown(format!(
            "job panicked: {}",
            panic_message(&panic)
        ))),
    }
}

#[cfg(test)]
#[path = "thread_tests.rs"]
mod tests;
