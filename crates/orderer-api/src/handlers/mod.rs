//! HTTP API handlers: exposes daemon state as JSON.

pub mod sessions;
pub mod status;

use std::time::Instant;

use tokio::sync::{broadcast, watch};

use orderer_services::{BroadcastSettings, Broadcaster, CutterStatus, Sequencer, SessionTable};

#[derive(Clone)]
pub struct ApiState {
    /// Cutter snapshots. Read-only; the cutter task is the only writer.
    pub status: watch::Receiver<CutterStatus>,
    pub sessions: SessionTable,
    pub settings: BroadcastSettings,
    /// Sequencer backend name, e.g. "file".
    pub backend: &'static str,
    /// Where clients connect, e.g. "127.0.0.1:7050".
    pub broadcast_addr: String,
    pub started_at: Instant,
    /// Shutdown broadcast sender: signals graceful daemon shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ApiState {
    pub fn new<S: Sequencer>(
        broadcaster: &Broadcaster<S>,
        broadcast_addr: String,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            status: broadcaster.status_watcher(),
            sessions: broadcaster.sessions().clone(),
            settings: *broadcaster.settings(),
            backend: broadcaster.backend(),
            broadcast_addr,
            started_at: Instant::now(),
            shutdown_tx,
        }
    }
}

pub use sessions::{handle_session_inspect, handle_sessions};
pub use status::{handle_shutdown, handle_status};

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use orderer_core::ChainState;
    use orderer_services::{BatchSettings, IntakeLimits, MemorySequencer};

    pub(crate) fn test_state() -> (ApiState, Broadcaster<MemorySequencer>) {
        let (seq, _log) = MemorySequencer::new();
        let settings = BroadcastSettings {
            batch: BatchSettings::new(5, Duration::from_millis(250)),
            queue_capacity: 5,
            limits: IntakeLimits {
                max_message_bytes: 128,
            },
        };
        let broadcaster = Broadcaster::new(seq, settings, ChainState::genesis());
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = ApiState::new(&broadcaster, "127.0.0.1:7050".into(), shutdown_tx);
        (state, broadcaster)
    }
}
