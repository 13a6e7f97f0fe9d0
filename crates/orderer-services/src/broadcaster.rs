//! Broadcaster: one cutter, any number of client sessions.
//!
//! The first call to [`Broadcaster::start`] (directly, or via the first
//! [`Broadcaster::broadcast`]) emits genesis if the chain is empty and then
//! spawns the cutter loop. That happens exactly once no matter how many
//! sessions race to it. If genesis fails, the gate stays open and the next
//! caller tries again.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;

use orderer_core::config::OrdererConfig;
use orderer_core::ChainState;

use crate::cutter::{BatchSettings, Cutter, CutterError, CutterStatus};
use crate::intake::{self, BroadcastStream, IntakeError, IntakeLimits, IntakeSummary};
use crate::sequencer::Sequencer;
use crate::session::{new_session_table, SessionGuard, SessionTable};

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    pub batch: BatchSettings,
    /// Bound of the intake → cutter queue. At least 1.
    pub queue_capacity: usize,
    pub limits: IntakeLimits,
}

impl BroadcastSettings {
    pub fn from_config(config: &OrdererConfig) -> Self {
        let batch = BatchSettings::from_config(&config.batch);
        Self {
            batch,
            queue_capacity: config.intake.capacity_for(batch.max_messages).max(1),
            limits: IntakeLimits {
                max_message_bytes: config.intake.max_message_bytes,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("genesis failed: {0}")]
    Genesis(#[source] CutterError),

    #[error("broadcaster is closed")]
    Closed,

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("cutter stopped with error: {0}")]
    Cutter(#[source] CutterError),

    #[error("cutter task failed: {0}")]
    Join(String),
}

type CutterTask = JoinHandle<Result<ChainState, CutterError>>;

pub struct Broadcaster<S: Sequencer> {
    queue_tx: mpsc::Sender<Bytes>,
    settings: BroadcastSettings,
    backend: &'static str,
    startup: OnceCell<()>,
    /// The cutter before it is spawned. Lock order: `idle`, then `task`.
    idle: Mutex<Option<(Cutter<S>, mpsc::Receiver<Bytes>)>>,
    task: Mutex<Option<CutterTask>>,
    status_rx: watch::Receiver<CutterStatus>,
    shutdown: watch::Sender<bool>,
    sessions: SessionTable,
    next_session: AtomicU64,
}

impl<S: Sequencer> Broadcaster<S> {
    /// `chain` is where the next block goes: [`ChainState::genesis`] for a
    /// new chain, or the state after the backend's tip when resuming.
    pub fn new(sequencer: S, settings: BroadcastSettings, chain: ChainState) -> Self {
        let backend = sequencer.name();
        let (cutter, status_rx) = Cutter::new(sequencer, settings.batch, chain);
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        Self {
            queue_tx,
            settings,
            backend,
            startup: OnceCell::new(),
            idle: Mutex::new(Some((cutter, queue_rx))),
            task: Mutex::new(None),
            status_rx,
            shutdown,
            sessions: new_session_table(),
            next_session: AtomicU64::new(1),
        }
    }

    /// Emit genesis (if needed) and spawn the cutter. Idempotent.
    pub async fn start(&self) -> Result<(), BroadcastError> {
        self.startup
            .get_or_try_init(|| async {
                let mut idle = self.idle.lock().await;
                let Some((mut cutter, queue)) = idle.take() else {
                    return Err(BroadcastError::Closed);
                };

                if cutter.chain().needs_genesis() {
                    if let Err(e) = cutter.emit_genesis().await {
                        tracing::error!(error = %e, "genesis failed; will retry on next start");
                        *idle = Some((cutter, queue));
                        return Err(BroadcastError::Genesis(e));
                    }
                } else {
                    tracing::info!(
                        next_number = cutter.chain().next_number,
                        "resuming existing chain"
                    );
                }

                let handle = tokio::spawn(cutter.run(queue, self.shutdown.subscribe()));
                *self.task.lock().await = Some(handle);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Serve one client stream to completion.
    pub async fn broadcast<T: BroadcastStream>(
        &self,
        stream: &mut T,
    ) -> Result<IntakeSummary, BroadcastError> {
        self.start().await?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer();
        let session = SessionGuard::open(&self.sessions, id, peer.clone());
        tracing::info!(session = id, %peer, "broadcast session opened");

        match intake::recv_requests(stream, &self.queue_tx, self.settings.limits, &session).await {
            Ok(summary) => {
                tracing::info!(
                    session = id,
                    received = summary.received,
                    accepted = summary.accepted,
                    rejected = summary.rejected,
                    "broadcast session closed"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!(session = id, %peer, error = %e, "broadcast session failed");
                Err(e.into())
            }
        }
    }

    /// Latest cutter snapshot.
    pub fn status(&self) -> CutterStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that is notified on every cutter change.
    pub fn status_watcher(&self) -> watch::Receiver<CutterStatus> {
        self.status_rx.clone()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.settings
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Stop the cutter: drain the queue, cut the partial batch, close the
    /// sequencer. Returns the final chain state if the cutter had started.
    pub async fn close(&self) -> Result<Option<ChainState>, BroadcastError> {
        self.shutdown.send_replace(true);

        let mut idle = self.idle.lock().await;
        let task = self.task.lock().await.take();

        match task {
            Some(handle) => {
                drop(idle);
                let chain = handle
                    .await
                    .map_err(|e| BroadcastError::Join(e.to_string()))?
                    .map_err(BroadcastError::Cutter)?;
                tracing::info!(next_number = chain.next_number, "broadcaster closed");
                Ok(Some(chain))
            }
            None => {
                if let Some((mut cutter, _queue)) = idle.take() {
                    cutter.close().await.map_err(BroadcastError::Cutter)?;
                }
                Ok(None)
            }
        }
    }
}
