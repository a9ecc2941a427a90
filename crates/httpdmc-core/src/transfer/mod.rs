//! Transfer sessions.
//!
//! A session owns the range allocator, the worker threads and the terminal
//! state of one download or upload. Workers share an `Arc<Shared>`; the last
//! one to finish runs the whole-body fallback if needed and signals the end
//! of the stream. The first fatal error wins and marks the buffer errored so
//! the remaining workers wind down.

mod body;
mod download;
mod fallback;
mod upload;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use url::Url;

use crate::buffer::SharedBuffer;
use crate::error::{DmcError, Result};
use crate::pool::ConnectionPool;
use crate::range::RangeAllocator;
use crate::retry::RetryPolicy;

use worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

/// Parameters fixed for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Worker threads to start (forced to 1 without partial transfer).
    pub streams: usize,
    /// Ranged transfer allowed at start.
    pub partial: bool,
    /// Minimum bytes per ranged request.
    pub chunk_size: u64,
    pub max_redirects: u32,
    pub retry: RetryPolicy,
    /// Known object size (download hint or declared upload size).
    pub size: Option<u64>,
}

#[derive(Debug, Default)]
struct Tally {
    spawned: Option<usize>,
    finished: usize,
}

/// State shared by the coordinator and every worker of a session.
pub(crate) struct Shared {
    direction: Direction,
    location: Mutex<Url>,
    pub(crate) allocator: RangeAllocator,
    pub(crate) pool: Arc<ConnectionPool>,
    pub(crate) buffer: Arc<dyn SharedBuffer>,
    pub(crate) settings: SessionSettings,
    partial: AtomicBool,
    confirmed: AtomicBool,
    pub(crate) delivered: Arc<AtomicU64>,
    failure: Mutex<Option<DmcError>>,
    tally: Mutex<Tally>,
    gate: Condvar,
}

impl Shared {
    fn tally(&self) -> MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn location(&self) -> Url {
        self.location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_location(&self, url: Url) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = url;
    }

    pub(crate) fn partial_allowed(&self) -> bool {
        self.partial.load(Ordering::SeqCst)
    }

    pub(crate) fn disable_partial(&self) {
        self.partial.store(false, Ordering::SeqCst);
    }

    pub(crate) fn confirmed(&self) -> bool {
        self.confirmed.load(Ordering::SeqCst)
    }

    pub(crate) fn confirm(&self) {
        self.confirmed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Records `err` unless a failure is already recorded, and marks the
    /// buffer errored.
    pub(crate) fn fail(&self, err: DmcError) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if failure.is_none() {
                tracing::warn!("{} of {} failed: {}", self.direction, self.location(), err);
                *failure = Some(err);
            }
        }
        self.buffer.mark_error();
    }

    fn take_failure(&self) -> Option<DmcError> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Blocks until the coordinator has finished spawning.
    fn wait_for_start(&self) {
        let mut tally = self.tally();
        while tally.spawned.is_none() {
            tally = self.gate.wait(tally).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn open_gate(&self, spawned: usize) {
        self.tally().spawned = Some(spawned);
        self.gate.notify_all();
    }

    /// Counts a finished worker; true for the last one.
    fn finish_worker(&self) -> bool {
        let mut tally = self.tally();
        tally.finished += 1;
        tally.spawned == Some(tally.finished)
    }
}

fn worker_main(shared: Arc<Shared>) {
    shared.wait_for_start();
    let direction = shared.direction;
    let mut worker = match Worker::new(Arc::clone(&shared)) {
        Ok(w) => Some(w),
        Err(e) => {
            shared.fail(e);
            None
        }
    };
    if let Some(w) = worker.as_mut() {
        match direction {
            Direction::Download => download::run(w),
            Direction::Upload => upload::run(w),
        }
        w.release_connection();
    }
    if shared.finish_worker() {
        match (direction, worker.as_mut()) {
            (Direction::Download, Some(w)) => download::finish(w),
            (Direction::Upload, Some(w)) => upload::finish(w),
            (Direction::Download, None) => shared.buffer.end_fill(),
            (Direction::Upload, None) => shared.buffer.end_drain(),
        }
    }
}

/// A running transfer. Dropping it stops the transfer.
pub struct Session {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Session {
    /// Spawns the workers of a new session between `location` and `buffer`.
    pub fn start(
        direction: Direction,
        location: Url,
        pool: Arc<ConnectionPool>,
        buffer: Arc<dyn SharedBuffer>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let streams = if settings.partial {
            settings.streams.max(1)
        } else {
            1
        };
        let allocator = RangeAllocator::new(settings.size);
        let shared = Arc::new(Shared {
            direction,
            location: Mutex::new(location),
            allocator,
            pool,
            buffer,
            partial: AtomicBool::new(settings.partial),
            settings,
            confirmed: AtomicBool::new(false),
            delivered: Arc::new(AtomicU64::new(0)),
            failure: Mutex::new(None),
            tally: Mutex::new(Tally::default()),
            gate: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(streams);
        for n in 0..streams {
            let s = Arc::clone(&shared);
            match thread::Builder::new()
                .name(format!("httpdmc-{direction}-{n}"))
                .spawn(move || worker_main(s))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::warn!("failed to spawn {} worker {}: {}", direction, n, e),
            }
        }
        shared.open_gate(workers.len());
        if workers.is_empty() {
            shared.buffer.mark_error();
            return Err(DmcError::NoWorkers);
        }
        tracing::info!(
            "{} of {} started with {} stream(s), partial={}",
            direction,
            shared.location(),
            workers.len(),
            shared.partial_allowed()
        );
        Ok(Self { shared, workers })
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Current location (moves when redirects are followed).
    pub fn location(&self) -> Url {
        self.shared.location()
    }

    /// Bytes delivered to the buffer (download) or accepted by the server
    /// (upload) so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Stops the session: errors the buffer unless the engine side already
    /// ended cleanly, joins every worker and reports the outcome.
    pub fn stop(&mut self) -> Result<()> {
        let buffer = &self.shared.buffer;
        let ended = match self.shared.direction {
            Direction::Download => buffer.fill_ended(),
            Direction::Upload => buffer.drain_ended(),
        };
        if !ended || buffer.has_error() {
            buffer.mark_error();
        }
        let mut panicked = false;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked = true;
            }
        }
        if panicked {
            self.shared
                .fail(DmcError::Protocol("transfer worker panicked".into()));
        }

        let result = match self.shared.take_failure() {
            Some(err) => Err(err),
            None if self.shared.buffer.has_error() => Err(DmcError::Aborted),
            None => Ok(()),
        };
        tracing::info!(
            "{} of {} stopped after {} bytes: {:?}",
            self.shared.direction,
            self.shared.location(),
            self.delivered(),
            result
        );
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("direction", &self.shared.direction)
            .field("location", &self.shared.location().as_str())
            .field("workers", &self.workers.len())
            .finish()
    }
}
