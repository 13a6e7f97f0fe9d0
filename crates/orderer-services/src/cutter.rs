//! Batch cutter: the single owner of the pending buffer and chain state.
//!
//! Messages arrive over a bounded queue; a block is cut when the buffer
//! reaches `max_messages` or when the periodic timer fires with a non-empty
//! buffer. Each block is sealed (encoded + hashed) and handed to the
//! [`Sequencer`]; the chain only advances once the backend accepts it.
//!
//! A send failure halts the cutter. The unsent messages go back into the
//! buffer, the chain stays where it was, the queue is closed so intake
//! starts answering SERVICE_UNAVAILABLE, and the reason is published in
//! [`CutterStatus::halted`]. Nothing is retried here; retries belong to the
//! sequencer (see [`crate::sequencer::Retrying`]).
//!
//! The queue is closed only once the failing send returns. Until then
//! intake keeps enqueueing and acking SUCCESS, up to the queue capacity.
//! Those messages are drained into the pending buffer, counted in
//! [`CutterStatus::pending`] and logged at `error` on exit; they are not
//! delivered.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use orderer_core::block::{Block, BlockError, SealedBlock};
use orderer_core::config::BatchConfig;
use orderer_core::ChainState;

use crate::sequencer::{Sequencer, SequencerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Cut as soon as this many messages are pending. Always at least 1.
    pub max_messages: usize,
    /// Cut a non-empty buffer at this interval.
    pub period: Duration,
}

impl BatchSettings {
    pub fn new(max_messages: usize, period: Duration) -> Self {
        Self {
            max_messages: max_messages.max(1),
            period,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.size, config.period())
    }
}

/// Read-only snapshot of the cutter, republished after every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CutterStatus {
    pub next_number: u64,
    /// Hex of the last accepted block's hash. Empty before genesis.
    pub prev_hash: String,
    pub pending: usize,
    /// Blocks accepted by the backend since this cutter was created,
    /// genesis included.
    pub blocks_cut: u64,
    /// The periodic loop is running.
    pub started: bool,
    pub halted: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CutterError {
    #[error("failed to encode block {number}: {source}")]
    Encode {
        number: u64,
        #[source]
        source: BlockError,
    },

    #[error("sequencer rejected block {number}: {source}")]
    Send {
        number: u64,
        #[source]
        source: SequencerError,
    },

    #[error("cutter is halted at block {next_number}")]
    Halted { next_number: u64 },

    #[error("genesis block already accepted")]
    GenesisDone,

    #[error("failed to close sequencer: {0}")]
    Close(#[source] SequencerError),
}

pub struct Cutter<S> {
    sequencer: S,
    settings: BatchSettings,
    chain: ChainState,
    pending: Vec<Bytes>,
    blocks_cut: u64,
    started: bool,
    halted: Option<String>,
    status_tx: watch::Sender<CutterStatus>,
}

impl<S: Sequencer> Cutter<S> {
    /// A cutter continuing from `chain`. Pass [`ChainState::genesis`] for a
    /// fresh chain, or [`ChainState::after`] the backend's tip to resume.
    pub fn new(
        sequencer: S,
        settings: BatchSettings,
        chain: ChainState,
    ) -> (Self, watch::Receiver<CutterStatus>) {
        let (status_tx, status_rx) = watch::channel(CutterStatus::default());
        let cutter = Self {
            sequencer,
            settings,
            chain,
            pending: Vec::with_capacity(settings.max_messages),
            blocks_cut: 0,
            started: false,
            halted: None,
            status_tx,
        };
        cutter.publish();
        (cutter, status_rx)
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn pending(&self) -> &[Bytes] {
        &self.pending
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn sequencer_name(&self) -> &'static str {
        self.sequencer.name()
    }

    /// Send block 0. Only valid on an empty chain. A failure here leaves the
    /// cutter usable so the caller can try again.
    pub async fn emit_genesis(&mut self) -> Result<SealedBlock, CutterError> {
        if !self.chain.needs_genesis() {
            return Err(CutterError::GenesisDone);
        }
        self.check_running()?;

        let sealed = Block::genesis()
            .seal()
            .map_err(|source| CutterError::Encode { number: 0, source })?;
        self.sequencer
            .send(sealed.data.clone())
            .await
            .map_err(|source| CutterError::Send { number: 0, source })?;

        self.commit(&sealed);
        tracing::info!(hash = %hex::encode(sealed.hash), "genesis block accepted");
        Ok(sealed)
    }

    /// Buffer one message, cutting if the buffer is now full.
    pub async fn on_message(&mut self, msg: Bytes) -> Result<Option<SealedBlock>, CutterError> {
        self.check_running()?;
        self.pending.push(msg);
        if self.pending.len() >= self.settings.max_messages {
            return self.cut().await;
        }
        self.publish();
        Ok(None)
    }

    /// Timer trigger: cut whatever is pending.
    pub async fn on_tick(&mut self) -> Result<Option<SealedBlock>, CutterError> {
        self.check_running()?;
        self.cut().await
    }

    /// Seal the pending buffer into the next block and send it. An empty
    /// buffer is a no-op.
    pub async fn cut(&mut self) -> Result<Option<SealedBlock>, CutterError> {
        self.check_running()?;
        if self.pending.is_empty() {
            return Ok(None);
        }

        let number = self.chain.next_number;
        let block = Block::new(
            number,
            self.chain.prev_hash.clone(),
            std::mem::take(&mut self.pending),
        );

        let sealed = match block.seal() {
            Ok(sealed) => sealed,
            Err(source) => {
                self.pending = block.into_messages();
                let err = CutterError::Encode { number, source };
                self.halt(&err);
                return Err(err);
            }
        };

        if let Err(source) = self.sequencer.send(sealed.data.clone()).await {
            self.pending = block.into_messages();
            let err = CutterError::Send { number, source };
            self.halt(&err);
            return Err(err);
        }

        self.commit(&sealed);
        tracing::info!(
            number,
            messages = sealed.message_count,
            hash = %hex::encode(sealed.hash),
            "block cut"
        );
        Ok(Some(sealed))
    }

    /// Flush the partial batch (unless halted) and close the sequencer.
    pub async fn close(&mut self) -> Result<(), CutterError> {
        let flushed = if self.is_halted() {
            Ok(())
        } else {
            self.cut().await.map(|_| ())
        };

        if !self.pending.is_empty() {
            tracing::error!(
                pending = self.pending.len(),
                next_number = self.chain.next_number,
                "cutter stopping with unsent messages"
            );
        }

        let closed = self.sequencer.close().await.map_err(CutterError::Close);
        flushed.and(closed)
    }

    /// Drive the cutter until `shutdown` flips to true, every queue sender
    /// is gone, or a cut fails.
    ///
    /// On the way out the queue is closed and drained, the final partial
    /// batch is cut and the sequencer is closed. Returns the final chain
    /// state, or [`CutterError::Halted`] if the cutter halted.
    pub async fn run(
        mut self,
        mut queue: mpsc::Receiver<Bytes>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ChainState, CutterError> {
        self.started = true;
        self.publish();

        let period = self.settings.period;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            next_number = self.chain.next_number,
            max_messages = self.settings.max_messages,
            period_ms = period.as_millis() as u64,
            backend = self.sequencer.name(),
            "cutter started"
        );

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow_and_update() {
                            tracing::info!("cutter shutting down");
                            break;
                        }
                    }

                    msg = queue.recv() => {
                        let Some(msg) = msg else {
                            tracing::info!("intake queue closed, cutter stopping");
                            break;
                        };
                        // Errors are logged by `cut`; a failure leaves us halted.
                        let _ = self.on_message(msg).await;
                        if self.is_halted() {
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        let _ = self.on_tick().await;
                        if self.is_halted() {
                            break;
                        }
                    }
                }
            }
        }

        self.finish(queue).await
    }

    async fn finish(mut self, mut queue: mpsc::Receiver<Bytes>) -> Result<ChainState, CutterError> {
        queue.close();
        while let Some(msg) = queue.recv().await {
            if self.is_halted() {
                self.pending.push(msg);
            } else {
                let _ = self.on_message(msg).await;
            }
        }

        self.close().await?;
        self.started = false;
        self.publish();

        match self.halted {
            Some(_) => Err(CutterError::Halted {
                next_number: self.chain.next_number,
            }),
            None => Ok(self.chain),
        }
    }

    fn check_running(&self) -> Result<(), CutterError> {
        match self.halted {
            Some(_) => Err(CutterError::Halted {
                next_number: self.chain.next_number,
            }),
            None => Ok(()),
        }
    }

    fn commit(&mut self, sealed: &SealedBlock) {
        self.chain.advance(sealed);
        self.blocks_cut += 1;
        self.publish();
    }

    fn halt(&mut self, err: &CutterError) {
        tracing::error!(
            next_number = self.chain.next_number,
            pending = self.pending.len(),
            error = %err,
            "cutter halted"
        );
        self.halted = Some(err.to_string());
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(CutterStatus {
            next_number: self.chain.next_number,
            prev_hash: self.chain.prev_hash_hex(),
            pending: self.pending.len(),
            blocks_cut: self.blocks_cut,
            started: self.started,
            halted: self.halted.clone(),
        });
    }
}
