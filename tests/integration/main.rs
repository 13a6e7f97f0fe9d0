//! Orderer integration test harness.
//!
//! Every test runs one or more in-process nodes: a [`Broadcaster`] behind a
//! real TCP listener on 127.0.0.1, fed by [`BroadcastClient`]s over the
//! loopback interface. Nodes bind port 0, so tests can run in parallel.
//!
//!   cargo test --test integration

mod broadcast;
mod failures;
mod recovery;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{channel, Sender};
use tokio::task::JoinHandle;

use orderer_core::{Block, ChainState};
use orderer_services::{
    tcp, BatchSettings, BroadcastClient, BroadcastSettings, Broadcaster, IntakeLimits, Sequencer,
};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

pub struct Node<S: Sequencer> {
    pub addr: SocketAddr,
    pub broadcaster: Arc<Broadcaster<S>>,
    shutdown: Sender<()>,
    listener: JoinHandle<anyhow::Result<()>>,
}

impl<S: Sequencer> Node<S> {
    /// Start a node continuing from `chain`. A failed genesis is tolerated
    /// here; the first session retries it.
    pub async fn start(sequencer: S, settings: BroadcastSettings, chain: ChainState) -> Result<Self> {
        let broadcaster = Arc::new(Broadcaster::new(sequencer, settings, chain));
        if let Err(e) = broadcaster.start().await {
            println!("node start: {e}");
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, rx) = channel(1);
        let listener = tokio::spawn(tcp::serve(listener, broadcaster.clone(), rx));

        Ok(Self {
            addr,
            broadcaster,
            shutdown,
            listener,
        })
    }

    pub async fn client(&self) -> Result<BroadcastClient> {
        BroadcastClient::connect(self.addr)
            .await
            .with_context(|| format!("failed to connect to {}", self.addr))
    }

    /// Stop accepting, then flush and close the cutter.
    pub async fn stop(self) -> Result<Option<ChainState>> {
        let _ = self.shutdown.send(());
        self.listener.await??;
        Ok(self.broadcaster.close().await?)
    }
}

pub fn settings(max_messages: usize, period: Duration) -> BroadcastSettings {
    BroadcastSettings {
        batch: BatchSettings::new(max_messages, period),
        queue_capacity: max_messages,
        limits: IntakeLimits {
            max_message_bytes: 4096,
        },
    }
}

/// Batch settings that never cut on the timer during a test.
pub fn size_only(max_messages: usize) -> BroadcastSettings {
    settings(max_messages, Duration::from_secs(3600))
}

pub fn decode_all(blocks: &[Bytes]) -> Result<Vec<Block>> {
    blocks
        .iter()
        .map(|b| Block::decode(b).context("undecodable block"))
        .collect()
}

/// Client payloads in chain order, genesis excluded.
pub fn payloads(blocks: &[Bytes]) -> Result<Vec<Bytes>> {
    Ok(decode_all(blocks)?
        .into_iter()
        .filter(|b| !b.is_genesis())
        .flat_map(Block::into_messages)
        .collect())
}

/// Await `fut`, failing the test after [`WAIT`].
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> Result<T> {
    match tokio::time::timeout(WAIT, fut).await {
        Ok(v) => Ok(v),
        Err(_) => bail!("timed out waiting for {what}"),
    }
}

pub fn msg(s: impl AsRef<str>) -> Bytes {
    Bytes::copy_from_slice(s.as_ref().as_bytes())
}
