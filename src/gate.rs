//! The recording gate decides whether incoming records are kept.
//!
//! Only the [RecordingCoordinator](crate::coordinator::RecordingCoordinator)
//! owns a [RecordingGate] and can open or close it; ingest workers get a
//! read-only [GateReader] when they are spawned.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// The writable side of the gate.
#[derive(Debug, Default)]
pub struct RecordingGate {
    open: Arc<AtomicBool>,
}

/// A read-only view of a [RecordingGate], cheap to clone into worker threads.
#[derive(Debug, Clone)]
pub struct GateReader {
    open: Arc<AtomicBool>,
}

impl RecordingGate {
    /// Make a new, closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a reader for a worker thread.
    pub fn reader(&self) -> GateReader {
        GateReader {
            open: Arc::clone(&self.open),
        }
    }

    pub(crate) fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether records are currently being kept.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl GateReader {
    /// Whether records are currently being kept.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
