//! The thread-safe store where ingest workers put the records of the current
//! calibration point, together with the liveness of every session.
//!
//! Both live behind one lock. The [RecordStore] itself belongs to the
//! coordinator, which can only [clear](RecordStore::clear) and
//! [drain](RecordStore::drain) it. Workers get a [ClientSlot] that can only
//! append to, and update the status of, their own client.

use crate::ClientId;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The worker is reading from its socket
    Connected,
    /// The peer closed the connection, or reading from it failed
    Disconnected,
    /// Nothing arrived for longer than the idle timeout
    TimedOut,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::TimedOut => "timed out",
        };
        write!(f, "{}", s)
    }
}

/// Liveness bookkeeping for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionState {
    /// Last status the worker reported
    pub status: SessionStatus,
    /// When the worker last received any bytes
    pub last_activity: Instant,
}

#[derive(Debug, Default)]
struct Shared {
    records: HashMap<ClientId, Vec<String>>,
    sessions: BTreeMap<ClientId, SessionState>,
}

/// Records of the current calibration point, keyed by client.
#[derive(Debug, Default)]
pub struct RecordStore {
    shared: Arc<Mutex<Shared>>,
}

/// A worker's handle onto its own entry in the [RecordStore].
#[derive(Debug)]
pub struct ClientSlot {
    id: ClientId,
    shared: Arc<Mutex<Shared>>,
}

/// Read-only access to session liveness.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    shared: Arc<Mutex<Shared>>,
}

// A worker that panicked while holding the lock cannot have left the maps
// half-updated, every critical section is a single insert or remove.
fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordStore {
    /// Instantiate an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register client `id` as connected and hand out its slot.
    pub fn slot(&self, id: ClientId) -> ClientSlot {
        lock(&self.shared).sessions.insert(
            id,
            SessionState {
                status: SessionStatus::Connected,
                last_activity: Instant::now(),
            },
        );
        ClientSlot {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// A read-only view of session liveness.
    pub fn status_board(&self) -> StatusBoard {
        StatusBoard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drop every buffered record. Session states are kept.
    pub fn clear(&self) {
        lock(&self.shared).records.clear();
    }

    /// Total number of records buffered so far, across clients.
    pub fn record_count(&self) -> usize {
        lock(&self.shared).records.values().map(Vec::len).sum()
    }

    /// Take every buffered record, leaving the store empty. Clients are
    /// returned in id order; records keep their arrival order.
    pub fn drain(&self) -> BTreeMap<ClientId, Vec<String>> {
        lock(&self.shared).records.drain().collect()
    }
}

impl ClientSlot {
    /// The client this slot belongs to.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Append one raw record to this client's list.
    pub fn push(&self, record: String) {
        lock(&self.shared)
            .records
            .entry(self.id)
            .or_default()
            .push(record);
    }

    /// Note that bytes just arrived.
    pub fn touch(&self) {
        if let Some(state) = lock(&self.shared).sessions.get_mut(&self.id) {
            state.last_activity = Instant::now();
        }
    }

    /// Record the session's new status.
    pub fn mark(&self, status: SessionStatus) {
        if let Some(state) = lock(&self.shared).sessions.get_mut(&self.id) {
            state.status = status;
        }
    }
}

impl StatusBoard {
    /// Snapshot of every session, in id order.
    pub fn sessions(&self) -> Vec<(ClientId, SessionState)> {
        lock(&self.shared)
            .sessions
            .iter()
            .map(|(id, state)| (*id, *state))
            .collect()
    }

    /// Status of one session, if it was ever registered.
    pub fn status(&self, id: ClientId) -> Option<SessionStatus> {
        lock(&self.shared).sessions.get(&id).map(|s| s.status)
    }

    /// Ids of every session that is no longer connected.
    pub fn disconnected(&self) -> Vec<ClientId> {
        lock(&self.shared)
            .sessions
            .iter()
            .filter(|(_, state)| state.status != SessionStatus::Connected)
            .map(|(id, _)| *id)
            .collect()
    }

    /// True iff every registered session is still connected.
    pub fn all_connected(&self) -> bool {
        self.disconnected().is_empty()
    }
}
