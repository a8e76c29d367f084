// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot result cell the runners complete from a worker thread.

use mill_core::JobError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum State<T> {
    Pending,
    Ready(Result<T, JobError>),
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Writer half; completing it wakes every waiter on the paired future.
pub struct JobPromise<T> {
    shared: Arc<Shared<T>>,
    completed: bool,
}

/// Reader half handed to the submitter. The result is taken exactly once.
pub struct JobFuture<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected promise/future pair.
pub fn result_channel<T>() -> (JobPromise<T>, JobFuture<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        cond: Condvar::new(),
    });
    (
        JobPromise { shared: shared.clone(), completed: false },
        JobFuture { shared },
    )
}

impl<T> JobPromise<T> {
    pub fn complete(mut self, result: Result<T, JobError>) {
        self.fill(result);
        self.completed = true;
    }

    fn fill(&self, result: Result<T, JobError>) {
        let mut state = self.shared.state.lock();
        if matches!(*state, State::Pending) {
            *state = State::Ready(result);
            self.shared.cond.notify_all();
        }
    }
}

impl<T> Drop for JobPromise<T> {
    fn drop(&mut self) {
        // A promise dropped mid-flight (worker died) must not strand waiters.
        if !self.completed {
            self.fill(Err(JobError::unknown("job abandoned before completion")));
        }
    }
}

impl<T> JobFuture<T> {
    /// Block until the job completes and take its result.
    pub fn wait(&self) -> Result<T, JobError> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Ready(result) => return result,
                State::Taken => return Err(JobError::unknown("job result already taken")),
                State::Pending => {
                    *state = State::Pending;
                    self.shared.cond.wait(&mut state);
                }
            }
        }
    }

    /// Block up to `timeout`; `None` if the job is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, JobError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Ready(result) => return Some(result),
                State::Taken => {
                    return Some(Err(JobError::unknown("job result already taken")))
                }
                State::Pending => {
                    *state = State::Pending;
                    if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.state.lock(), State::Pending)
    }
}

#[cfg(test)]
#[path = "future_tests.rs"]
mod tests;
