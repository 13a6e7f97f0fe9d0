//! Sequencer clients: the boundary to the durable backend.
//!
//! The cutter hands each encoded block to a [`Sequencer`] and treats the
//! backend as the source of truth for total order and durability. The
//! contract every backend must meet:
//!
//! - `send` returning `Ok` means the backend has durably accepted the block
//!   and will deliver it to consumers after every block previously
//!   acknowledged by `send`, and before every block sent later.
//! - `send` returning `Err` means the block must be assumed NOT accepted.
//!   Backends may retry internally before reporting failure; the cutter
//!   never retries on its own.
//! - After `close`, every `send` fails with [`SequencerError::Closed`].
//!
//! Payloads are opaque to the backend.

mod file;
mod memory;
mod retry;
mod sqlite;

pub use file::{read_log, FileSequencer, LogContents};
pub use memory::{MemoryLog, MemorySequencer};
pub use retry::Retrying;
pub use sqlite::{read_blocks, SqliteSequencer};

use std::future::Future;
use std::path::PathBuf;

use bytes::Bytes;
use orderer_core::config::{BackendKind, SequencerConfig};

/// A durable, totally-ordered sink for encoded blocks.
pub trait Sequencer: Send + 'static {
    /// Hand one encoded block to the backend.
    fn send(&mut self, block: Bytes) -> impl Future<Output = Result<(), SequencerError>> + Send;

    /// Flush and release the backend.
    fn close(&mut self) -> impl Future<Output = Result<(), SequencerError>> + Send;

    /// The most recently accepted block, if the backend retains it. Used to
    /// resume the chain after a restart.
    fn tip(&mut self) -> impl Future<Output = Result<Option<Bytes>, SequencerError>> + Send {
        async { Ok(None) }
    }

    /// Short backend name for logs and status output.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("sequencer is closed")]
    Closed,

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt log {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("backend rejected block: {0}")]
    Rejected(String),

    #[error("backend task failed: {0}")]
    Task(String),
}

// ── Runtime selection ─────────────────────────────────────────────────────────

/// A backend chosen from configuration at startup.
pub enum AnySequencer {
    Memory(MemorySequencer),
    File(FileSequencer),
    Sqlite(SqliteSequencer),
}

impl Sequencer for AnySequencer {
    async fn send(&mut self, block: Bytes) -> Result<(), SequencerError> {
        match self {
            AnySequencer::Memory(s) => s.send(block).await,
            AnySequencer::File(s) => s.send(block).await,
            AnySequencer::Sqlite(s) => s.send(block).await,
        }
    }

    async fn close(&mut self) -> Result<(), SequencerError> {
        match self {
            AnySequencer::Memory(s) => s.close().await,
            AnySequencer::File(s) => s.close().await,
            AnySequencer::Sqlite(s) => s.close().await,
        }
    }

    async fn tip(&mut self) -> Result<Option<Bytes>, SequencerError> {
        match self {
            AnySequencer::Memory(s) => s.tip().await,
            AnySequencer::File(s) => s.tip().await,
            AnySequencer::Sqlite(s) => s.tip().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AnySequencer::Memory(s) => s.name(),
            AnySequencer::File(s) => s.name(),
            AnySequencer::Sqlite(s) => s.name(),
        }
    }
}

/// Open the configured backend, wrapped in the configured retry policy.
pub fn open(config: &SequencerConfig) -> Result<Retrying<AnySequencer>, SequencerError> {
    let backend = match config.backend {
        BackendKind::Memory => {
            tracing::warn!("memory sequencer selected: blocks are lost on exit");
            AnySequencer::Memory(MemorySequencer::new().0)
        }
        BackendKind::File => AnySequencer::File(FileSequencer::open(&config.path)?),
        BackendKind::Sqlite => AnySequencer::Sqlite(SqliteSequencer::open(&config.path)?),
    };
    tracing::info!(
        backend = backend.name(),
        path = %config.path.display(),
        retry_attempts = config.retry_attempts,
        "sequencer opened"
    );
    Ok(Retrying::new(
        backend,
        config.retry_attempts,
        config.retry_backoff(),
    ))
}
