//! Session table: one entry per connected broadcast client.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use orderer_core::Status;

/// Counters for one client stream.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    /// Transport-specific peer description, e.g. `127.0.0.1:50122`.
    pub peer: String,
    /// When the stream was accepted.
    pub established_at: Instant,
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// The session table: shared by intake tasks and the status API.
pub type SessionTable = Arc<DashMap<u64, SessionInfo>>;

/// Create a new empty session table.
pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

/// Registers a session for as long as it is alive.
pub struct SessionGuard {
    table: SessionTable,
    id: u64,
}

impl SessionGuard {
    pub fn open(table: &SessionTable, id: u64, peer: impl Into<String>) -> Self {
        table.insert(
            id,
            SessionInfo {
                id,
                peer: peer.into(),
                established_at: Instant::now(),
                received: 0,
                accepted: 0,
                rejected: 0,
            },
        );
        Self {
            table: table.clone(),
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Count one reply.
    pub fn record(&self, status: Status) {
        if let Some(mut info) = self.table.get_mut(&self.id) {
            info.received += 1;
            if status.is_success() {
                info.accepted += 1;
            } else {
                info.rejected += 1;
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
