// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job output capture.
//!
//! Each job gets a private line emitter so lines from one job are never
//! attributed to another. Worker threads register their job's writer in a
//! thread-local slot; [`stdout`]/[`stderr`] return writers that route to
//! the current thread's emitter while a runner has capture installed, and
//! to the real process streams otherwise.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sink that receives complete lines from a [`LineEmitter`].
pub type LineFn = Arc<dyn Fn(&str) + Send + Sync>;

/// `Write` adapter that splits its input on newlines and forwards each
/// complete line. Blank lines are dropped. A trailing fragment without a
/// newline is held back until [`flush_residual`](LineEmitter::flush_residual).
pub struct LineEmitter {
    buf: String,
    emit: LineFn,
}

impl LineEmitter {
    pub fn new(emit: LineFn) -> Self {
        Self { buf: String::new(), emit }
    }

    /// Emit any buffered non-newline-terminated fragment as a final line.
    pub fn flush_residual(&mut self) {
        if !self.buf.trim().is_empty() {
            (self.emit)(&self.buf);
        }
        self.buf.clear();
    }
}

impl Write for LineEmitter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches('\n');
            if !line.trim().is_empty() {
                (self.emit)(line);
            }
        }
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared, thread-safe handle to a job's line emitter.
#[derive(Clone)]
pub struct JobWriter(Arc<Mutex<LineEmitter>>);

impl JobWriter {
    pub fn new(emit: LineFn) -> Self {
        Self(Arc::new(Mutex::new(LineEmitter::new(emit))))
    }

    pub fn flush_residual(&self) {
        self.0.lock().flush_residual();
    }
}

impl Write for JobWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.lock().write(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

static CAPTURE_INSTALLS: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_SINK: RefCell<Option<JobWriter>> = const { RefCell::new(None) };
}

/// True while at least one runner has capture installed.
pub fn capture_installed() -> bool {
    CAPTURE_INSTALLS.load(Ordering::SeqCst) > 0
}

/// Refcounted installation handle; held by a runner for its lifetime.
pub struct CaptureGuard {
    _priv: (),
}

/// Install capture for the lifetime of the returned guard.
pub fn install_capture() -> CaptureGuard {
    CAPTURE_INSTALLS.fetch_add(1, Ordering::SeqCst);
    CaptureGuard { _priv: () }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURE_INSTALLS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Guard that routes the current thread's captured output to a job writer.
///
/// Dropping the guard flushes the residual fragment and clears the slot.
/// Not `Send`; it pins the registration to the registering thread.
pub struct SinkGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

pub fn set_thread_sink(writer: JobWriter) -> SinkGuard {
    THREAD_SINK.with(|slot| *slot.borrow_mut() = Some(writer));
    SinkGuard { _not_send: std::marker::PhantomData }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(writer) = THREAD_SINK.with(|slot| slot.borrow_mut().take()) {
            writer.flush_residual();
        }
    }
}

fn current_sink() -> Option<JobWriter> {
    THREAD_SINK.with(|slot| slot.borrow().clone())
}

/// Routed standard-output writer for job code.
pub fn stdout() -> CaptureWriter {
    CaptureWriter { to_stderr: false }
}

/// Routed standard-error writer for job code.
pub fn stderr() -> CaptureWriter {
    CaptureWriter { to_stderr: true }
}

pub struct CaptureWriter {
    to_stderr: bool,
}

impl Write for CaptureWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if capture_installed() {
            if let Some(mut writer) = current_sink() {
                return writer.write(bytes);
            }
        }
        if self.to_stderr {
            io::stderr().write(bytes)
        } else {
            io::stdout().write(bytes)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if capture_installed() {
            if let Some(mut writer) = current_sink() {
                return writer.flush();
            }
        }
        if self.to_stderr {
            io::stderr().flush()
        } else {
            io::stdout().flush()
        }
    }
}

#[cfg(test)]
#[path = "stdio_tests.rs"]
mod tests;
