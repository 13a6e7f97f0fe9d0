//! Broadcast intake: one loop per client stream.
//!
//! For each request: enqueue for the cutter, then reply, then read the
//! next request. Replies therefore go out one per request, in request order.
//! An ack means "enqueued", not "committed".

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use orderer_core::wire::WireError;
use orderer_core::{BroadcastReply, Status};

use crate::session::SessionGuard;

/// A bidirectional client stream: requests in, replies out.
pub trait BroadcastStream: Send {
    /// Next request payload. `Ok(None)` is a clean half-close.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;

    fn send(&mut self, reply: BroadcastReply)
        -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Peer description for logs and the session table.
    fn peer(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("receive failed after {received} requests: {source}")]
    Recv {
        received: u64,
        #[source]
        source: TransportError,
    },

    #[error("reply failed after {received} requests: {source}")]
    Send {
        received: u64,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct IntakeLimits {
    /// Larger payloads are answered with BAD_REQUEST and not enqueued.
    pub max_message_bytes: usize,
}

/// Per-session totals, returned on a clean close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl IntakeSummary {
    fn record(&mut self, status: Status) {
        self.received += 1;
        if status.is_success() {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// Serve one stream until the client half-closes or the transport fails.
///
/// Blocks on enqueue when the queue is full, so a slow cutter slows every
/// client down instead of growing memory.
pub async fn recv_requests<T: BroadcastStream>(
    stream: &mut T,
    queue: &mpsc::Sender<Bytes>,
    limits: IntakeLimits,
    session: &SessionGuard,
) -> Result<IntakeSummary, IntakeError> {
    let mut summary = IntakeSummary::default();

    loop {
        let msg = match stream.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(summary),
            Err(source) => {
                return Err(IntakeError::Recv {
                    received: summary.received,
                    source,
                })
            }
        };

        let len = msg.len();
        let status = if len > limits.max_message_bytes {
            Status::BadRequest
        } else if queue.send(msg).await.is_err() {
            Status::ServiceUnavailable
        } else {
            Status::Success
        };

        summary.record(status);
        session.record(status);

        stream
            .send(BroadcastReply::new(status))
            .await
            .map_err(|source| IntakeError::Send {
                received: summary.received,
                source,
            })?;

        tracing::debug!(
            session = session.id(),
            request = summary.received,
            len,
            %status,
            "broadcast reply"
        );
    }
}
