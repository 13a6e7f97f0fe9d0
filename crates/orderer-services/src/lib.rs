//! orderer-services: the batching engine and its adapters.
//!
//! Data path: client stream → [`intake`] → bounded queue → [`cutter`] →
//! [`sequencer`] backend. [`broadcaster`] wires one cutter to any number of
//! intake sessions and owns the one-time startup gate.

pub mod broadcaster;
pub mod cutter;
pub mod intake;
pub mod sequencer;
pub mod session;
pub mod tcp;

pub use broadcaster::{BroadcastError, BroadcastSettings, Broadcaster};
pub use cutter::{BatchSettings, Cutter, CutterError, CutterStatus};
pub use intake::{BroadcastStream, IntakeError, IntakeLimits, IntakeSummary, TransportError};
pub use sequencer::{
    AnySequencer, FileSequencer, MemoryLog, MemorySequencer, Retrying, Sequencer, SequencerError,
    SqliteSequencer,
};
pub use session::{new_session_table, SessionGuard, SessionInfo, SessionTable};
pub use tcp::{BroadcastClient, TcpBroadcastStream};
