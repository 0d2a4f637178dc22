//! The per-client ingest worker: reads a byte stream, splits it into
//! newline terminated records, and keeps them only while the recording gate
//! is open.

use crate::{
    gate::GateReader,
    record_store::{ClientSlot, SessionStatus},
};

use log::{debug, info, trace, warn};
use std::{
    io::{ErrorKind, Read},
    str,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

const READ_CHUNK: usize = 1024;

/// Reassembles newline terminated records out of arbitrarily split reads.
#[derive(Debug, Default)]
pub struct LineAssembler {
    read_buf: Vec<u8>,
}

impl LineAssembler {
    /// Make a new, empty [LineAssembler].
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in freshly read bytes and get back every record they complete,
    /// without the trailing `\n`. Incomplete trailing bytes are kept for the
    /// next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &c in bytes {
            if c != b'\n' {
                self.read_buf.push(c);
                continue;
            }
            match str::from_utf8(&self.read_buf) {
                Ok(s) => lines.push(s.to_owned()),
                // Often happens at the beginning of transmission when
                // there is still garbage in the client's buffer
                Err(e) => warn!("Failed to decode utf-8: {:?}", e),
            }
            self.read_buf.clear();
        }
        lines
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.read_buf.len()
    }
}

/// Reads from one client until it goes away.
///
/// `S` is normally a [TcpStream](std::net::TcpStream) with a read timeout
/// set; a read that times out is how the worker notices an idle client.
pub struct IngestWorker<S: Read> {
    source: S,
    slot: ClientSlot,
    gate: GateReader,
    stop: Arc<AtomicBool>,
    idle_timeout: Duration,
    assembler: LineAssembler,
}

impl<S: Read> IngestWorker<S> {
    /// Instantiate a worker. `stop` lets the registry end the worker at its
    /// next poll.
    pub fn new(
        source: S,
        slot: ClientSlot,
        gate: GateReader,
        stop: Arc<AtomicBool>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            source,
            slot,
            gate,
            stop,
            idle_timeout,
            assembler: LineAssembler::new(),
        }
    }

    /// Run until the client disconnects, times out, or the worker is told to
    /// stop. The final status is written to the shared store before the
    /// connection is dropped.
    pub fn run(mut self) -> SessionStatus {
        let id = self.slot.id();
        let status = self.pump();
        self.slot.mark(status);
        info!("[Client {}] {}", id, status);
        status
    }

    fn pump(&mut self) -> SessionStatus {
        let id = self.slot.id();
        let mut buffer = [0; READ_CHUNK];
        let mut last_data = Instant::now();

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("[Client {}] stop requested", id);
                return SessionStatus::Disconnected;
            }

            match self.source.read(&mut buffer) {
                Ok(0) => return SessionStatus::Disconnected,
                Ok(read_len) => {
                    last_data = Instant::now();
                    self.slot.touch();
                    for line in self.assembler.push(&buffer[..read_len]) {
                        self.dispatch(line);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if last_data.elapsed() > self.idle_timeout {
                        warn!("[Client {}] Timeout - no data received", id);
                        return SessionStatus::TimedOut;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("[Client {}] Error: {}", id, e);
                    return SessionStatus::Disconnected;
                }
            }
        }
    }

    fn dispatch(&self, line: String) {
        if self.gate.is_open() {
            self.slot.push(line);
        } else {
            trace!("[Client {}] gate closed, dropping {:?}", self.slot.id(), line);
        }
    }
}
