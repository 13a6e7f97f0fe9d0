//! In-process backend. Durable only for the life of the process.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use super::{Sequencer, SequencerError};

/// Shared view of everything a [`MemorySequencer`] has accepted.
///
/// Clone it freely; all clones see the same log. Consumers can wait for the
/// log to reach a length, and tests can inject send failures.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

struct Inner {
    blocks: watch::Sender<Vec<Bytes>>,
    /// Upcoming sends to reject. `u32::MAX` = reject until recovered.
    failing: AtomicU32,
    closed: AtomicBool,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                blocks: watch::Sender::new(Vec::new()),
                failing: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl MemoryLog {
    /// Snapshot of accepted blocks, in acceptance order.
    pub fn blocks(&self) -> Vec<Bytes> {
        self.inner.blocks.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.blocks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once at least `n` blocks have been accepted.
    pub async fn wait_for(&self, n: usize) {
        let mut rx = self.inner.blocks.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|blocks| blocks.len() >= n).await;
    }

    /// Reject the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        self.inner.failing.store(n, Ordering::SeqCst);
    }

    /// Reject every send until [`MemoryLog::recover`].
    pub fn fail_always(&self) {
        self.inner.failing.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.inner.failing.store(0, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Consume one injected failure, if any are pending.
    fn take_failure(&self) -> bool {
        self.inner
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

/// Backend that appends to a [`MemoryLog`].
pub struct MemorySequencer {
    log: MemoryLog,
}

impl MemorySequencer {
    /// A fresh backend and a handle to its log.
    pub fn new() -> (Self, MemoryLog) {
        let log = MemoryLog::default();
        (Self { log: log.clone() }, log)
    }

    /// A backend appending to an existing log, e.g. to simulate a restart.
    /// Reopening clears the closed flag.
    pub fn with_log(log: MemoryLog) -> Self {
        log.inner.closed.store(false, Ordering::SeqCst);
        Self { log }
    }
}

impl Sequencer for MemorySequencer {
    async fn send(&mut self, block: Bytes) -> Result<(), SequencerError> {
        if self.log.is_closed() {
            return Err(SequencerError::Closed);
        }
        if self.log.take_failure() {
            return Err(SequencerError::Rejected("injected failure".into()));
        }
        self.log.inner.blocks.send_modify(|blocks| blocks.push(block));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SequencerError> {
        self.log.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tip(&mut self) -> Result<Option<Bytes>, SequencerError> {
        Ok(self.log.inner.blocks.borrow().last().cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_appends_in_order() {
        let (mut seq, log) = MemorySequencer::new();
        seq.send(Bytes::from_static(b"a")).await.unwrap();
        seq.send(Bytes::from_static(b"b")).await.unwrap();
        assert_eq!(log.blocks(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(seq.tip().await.unwrap().unwrap(), "b");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let (mut seq, log) = MemorySequencer::new();
        log.fail_next(2);
        assert!(seq.send(Bytes::from_static(b"1")).await.is_err());
        assert!(seq.send(Bytes::from_static(b"2")).await.is_err());
        seq.send(Bytes::from_static(b"3")).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn fail_always_until_recover() {
        let (mut seq, log) = MemorySequencer::new();
        log.fail_always();
        for _ in 0..5 {
            assert!(matches!(
                seq.send(Bytes::from_static(b"x")).await,
                Err(SequencerError::Rejected(_))
            ));
        }
        log.recover();
        seq.send(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut seq, log) = MemorySequencer::new();
        seq.close().await.unwrap();
        assert!(log.is_closed());
        assert!(matches!(
            seq.send(Bytes::from_static(b"x")).await,
            Err(SequencerError::Closed)
        ));

        let mut reopened = MemorySequencer::with_log(log.clone());
        reopened.send(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_resolves_after_send() {
        let (mut seq, log) = MemorySequencer::new();
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move { log.wait_for(2).await })
        };
        seq.send(Bytes::from_static(b"1")).await.unwrap();
        seq.send(Bytes::from_static(b"2")).await.unwrap();
        waiter.await.unwrap();
    }
}
