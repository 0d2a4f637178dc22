//! Accepts the array clients and keeps track of their ingest workers.

use crate::{
    error::CalError,
    gate::GateReader,
    ingest::IngestWorker,
    record_store::{RecordStore, SessionState, SessionStatus, StatusBoard},
    ClientId,
};

use log::{info, warn};
use std::{
    io,
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Consecutive failed accepts before the listener is given up on.
const MAX_ACCEPT_FAILURES: u32 = 10;
const MAX_ACCEPT_WAIT: Duration = Duration::from_secs(1);

/// How long worker reads block, and when a silent client counts as gone.
#[derive(Debug, Clone, Copy)]
pub struct IngestTimeouts {
    /// Read timeout on each client socket, which bounds how late a worker
    /// notices a shutdown
    pub poll: Duration,
    /// Silence after which a client is marked timed out
    pub idle: Duration,
}

impl Default for IngestTimeouts {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(5),
            idle: Duration::from_secs(10),
        }
    }
}

/// One accepted client. The connection itself belongs to the worker thread.
#[derive(Debug)]
pub struct ClientSession {
    /// Assigned in connection order, starting at 1
    pub id: ClientId,
    /// Remote address of the client
    pub peer: SocketAddr,
    handle: Option<JoinHandle<SessionStatus>>,
}

/// Spaces out retries after failed accepts so a persistent error, like
/// running out of file descriptors, does not spin.
#[derive(Debug, Default)]
struct AcceptBackoff {
    failures: u32,
}

impl AcceptBackoff {
    /// Count one failure and return how long to wait before trying again.
    /// Gives the error back once too many have happened in a row.
    fn failed(&mut self, e: io::Error) -> Result<Duration, io::Error> {
        self.failures += 1;
        if self.failures >= MAX_ACCEPT_FAILURES {
            return Err(e);
        }
        let wait = Duration::from_millis(50) * 2u32.pow(self.failures);
        Ok(wait.min(MAX_ACCEPT_WAIT))
    }

    fn succeeded(&mut self) {
        self.failures = 0;
    }
}

/// The set of connected clients.
pub struct SessionRegistry {
    listener: TcpListener,
    sessions: Vec<ClientSession>,
    board: Option<StatusBoard>,
    stop: Arc<AtomicBool>,
    timeouts: IngestTimeouts,
}

impl SessionRegistry {
    /// Start listening on `addr`. Failing to bind is fatal for the run.
    pub fn bind(addr: impl ToSocketAddrs + ToString, timeouts: IngestTimeouts) -> Result<Self, CalError> {
        let listener = TcpListener::bind(&addr).map_err(|source| CalError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            sessions: Vec::new(),
            board: None,
            stop: Arc::new(AtomicBool::new(false)),
            timeouts,
        })
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, CalError> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until exactly `n` clients have connected. Clients get ids
    /// `1..=n` in arrival order and each gets an [IngestWorker] that records
    /// into `store` while `gate` is open.
    ///
    /// Returns once all `n` workers are running.
    pub fn accept_sessions(
        &mut self,
        n: usize,
        store: &RecordStore,
        gate: &GateReader,
    ) -> Result<&[ClientSession], CalError> {
        info!("Waiting for {} clients to connect...", n);
        self.board = Some(store.status_board());
        let mut backoff = AcceptBackoff::default();

        while self.sessions.len() < n {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => {
                    backoff.succeeded();
                    conn
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    thread::sleep(backoff.failed(e)?);
                    continue;
                }
            };
            let id = self.sessions.len() + 1;

            if let Err(e) = stream.set_read_timeout(Some(self.timeouts.poll)) {
                warn!("[Client {}] could not set read timeout: {}", id, e);
            }

            let worker = IngestWorker::new(
                stream,
                store.slot(id),
                gate.clone(),
                Arc::clone(&self.stop),
                self.timeouts.idle,
            );
            let handle = thread::Builder::new()
                .name(format!("ingest-{id}"))
                .spawn(move || worker.run())?;

            info!("[Client {}] Connected from {} ({}/{})", id, peer, id, n);
            self.sessions.push(ClientSession {
                id,
                peer,
                handle: Some(handle),
            });
        }

        info!("All {} clients connected!", n);
        Ok(&self.sessions)
    }

    /// Every accepted session, in id order.
    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    /// True iff no session has dropped out. Meant for warning the operator,
    /// the run can carry on without some clients.
    pub fn all_connected(&self) -> bool {
        self.board
            .as_ref()
            .map(StatusBoard::all_connected)
            .unwrap_or(true)
    }

    /// The sessions that have dropped out, with when each last sent data.
    pub fn dropped_sessions(&self) -> Vec<(ClientId, SessionState)> {
        let Some(board) = &self.board else {
            return Vec::new();
        };
        board
            .sessions()
            .into_iter()
            .filter(|(_, state)| state.status != SessionStatus::Connected)
            .collect()
    }

    /// Tell every worker to stop and wait for them. Each worker notices
    /// within one poll timeout.
    pub fn shutdown(&mut self) -> Vec<(ClientId, SessionStatus)> {
        self.stop.store(true, Ordering::Release);
        self.sessions
            .iter_mut()
            .filter_map(|session| {
                let handle = session.handle.take()?;
                match handle.join() {
                    Ok(status) => Some((session.id, status)),
                    Err(_) => {
                        warn!("[Client {}] worker panicked", session.id);
                        None
                    }
                }
            })
            .collect()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
