#![deny(missing_docs)]
//! Native background worker that ticks an engine until asked to stop.
//!
//! Lifecycle: [`ExecutionThread::start`] moves the engine onto a dedicated
//! thread (`Running`). [`ExecutionThread::stop`] only raises a flag
//! (`StopRequested`); the worker notices it at the next tick boundary and exits
//! (`Stopped`). [`ExecutionThread::try_stopped`] polls without blocking and is
//! the only way to obtain a [`StoppedThread`], whose [`StoppedThread::join`]
//! hands the engine back. An engine can therefore never be reclaimed while the
//! worker may still be touching it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

/// Work driven one step at a time by an [`ExecutionThread`].
pub trait TickEngine: Send + 'static {
    /// Advances the engine by one step and returns the amount of work done.
    fn tick(&mut self) -> usize;

    /// Name used for the worker thread and log lines.
    fn name(&self) -> &'static str;
}

/// Errors raised while starting or reclaiming a worker.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The engine panicked while ticking.
    #[error("worker thread `{0}` panicked")]
    Panicked(&'static str),
}

/// Observable state of a started worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Ticking.
    Running,
    /// Stop flag raised, worker has not exited yet.
    StopRequested,
    /// Worker exited; the engine can be reclaimed.
    Stopped,
}

struct WorkerShared {
    stop: AtomicBool,
    ticks: AtomicU64,
}

/// Handle to a running worker.
pub struct ExecutionThread<E: TickEngine> {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<E>>,
    name: &'static str,
}

impl<E: TickEngine> ExecutionThread<E> {
    /// Spawns a worker that ticks `engine` every `cadence` until stopped.
    ///
    /// A zero cadence yields between ticks instead of sleeping.
    pub fn start(mut engine: E, cadence: Duration) -> Result<Self, RuntimeError> {
        let name = engine.name();
        let shared = Arc::new(WorkerShared {
            stop: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("{name}: worker started");
                while !worker.stop.load(Ordering::Acquire) {
                    engine.tick();
                    worker.ticks.fetch_add(1, Ordering::Relaxed);
                    if cadence.is_zero() {
                        thread::yield_now();
                    } else {
                        thread::sleep(cadence);
                    }
                }
                debug!("{name}: worker observed stop request");
                engine
            })?;
        info!("{name}: execution thread running");
        Ok(Self {
            shared,
            handle: Some(handle),
            name,
        })
    }

    /// Requests the worker to stop at its next tick boundary. Returns immediately.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            info!("{}: stop requested", self.name);
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        let finished = self.handle.as_ref().map_or(true, JoinHandle::is_finished);
        if finished {
            RunState::Stopped
        } else if self.shared.stop.load(Ordering::Acquire) {
            RunState::StopRequested
        } else {
            RunState::Running
        }
    }

    /// Ticks completed by the worker so far.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Non-blocking poll. Yields the stopped handle once the worker has exited.
    pub fn try_stopped(mut self) -> Result<StoppedThread<E>, Self> {
        if self.state() != RunState::Stopped {
            return Err(self);
        }
        match self.handle.take() {
            Some(handle) => Ok(StoppedThread {
                handle,
                name: self.name,
                ticks: self.ticks(),
            }),
            None => Err(self),
        }
    }
}

impl<E: TickEngine> Drop for ExecutionThread<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop();
            if handle.join().is_err() {
                log::error!("{}: worker panicked before shutdown", self.name);
            }
        }
    }
}

/// A worker that has exited. Only produced by [`ExecutionThread::try_stopped`].
pub struct StoppedThread<E> {
    handle: JoinHandle<E>,
    name: &'static str,
    ticks: u64,
}

impl<E> StoppedThread<E> {
    /// Ticks the worker completed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reclaims the engine.
    pub fn join(self) -> Result<E, RuntimeError> {
        let name = self.name;
        self.handle
            .join()
            .map(|engine| {
                info!("{name}: execution thread joined");
                engine
            })
            .map_err(|_| RuntimeError::Panicked(name))
    }
}
