// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixed-width pool of named worker threads fed from a shared queue.

use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    tx: Option<mpsc::Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(width: usize, name_prefix: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(width.max(1));
        for i in 0..width.max(1) {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name_prefix}-{i}"))
                .spawn(move || loop {
                    // Release the queue lock before running the task so the
                    // other workers keep draining while this one is busy.
                    let task = { rx.lock().recv() };
                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(error = %e, "failed to spawn worker thread"),
            }
        }
        Self { tx: Some(tx), workers }
    }

    /// Queue a task; dropped with a warning if the pool is shut down.
    pub fn execute(&self, task: Task) {
        match &self.tx {
            Some(tx) => {
                if tx.send(task).is_err() {
                    tracing::warn!("worker pool is shut down; task dropped");
                }
            }
            None => tracing::warn!("worker pool is shut down; task dropped"),
        }
    }

    /// Stop accepting tasks and join the workers after they drain the queue.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
