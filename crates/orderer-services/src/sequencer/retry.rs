use std::time::Duration;

use bytes::Bytes;

use super::{Sequencer, SequencerError};

/// Retries failed sends before reporting failure to the cutter.
///
/// `attempts` counts retries after the first try, so `0` disables retrying.
/// [`SequencerError::Closed`] is never retried.
pub struct Retrying<S> {
    inner: S,
    attempts: u32,
    backoff: Duration,
}

impl<S: Sequencer> Retrying<S> {
    pub fn new(inner: S, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts,
            backoff,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Sequencer> Sequencer for Retrying<S> {
    async fn send(&mut self, block: Bytes) -> Result<(), SequencerError> {
        let mut attempt = 0;
        loop {
            match self.inner.send(block.clone()).await {
                Ok(()) => return Ok(()),
                Err(SequencerError::Closed) => return Err(SequencerError::Closed),
                Err(e) if attempt < self.attempts => {
                    attempt += 1;
                    tracing::warn!(
                        backend = self.inner.name(),
                        attempt,
                        of = self.attempts,
                        error = %e,
                        "sequencer send failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SequencerError> {
        self.inner.close().await
    }

    async fn tip(&mut self) -> Result<Option<Bytes>, SequencerError> {
        self.inner.tip().await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::MemorySequencer;

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_absorbed() {
        let (inner, log) = MemorySequencer::new();
        let mut seq = Retrying::new(inner, 3, Duration::from_millis(50));

        log.fail_next(2);
        seq.send(Bytes::from_static(b"block")).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let (inner, log) = MemorySequencer::new();
        let mut seq = Retrying::new(inner, 2, Duration::from_millis(50));

        log.fail_next(3);
        assert!(matches!(
            seq.send(Bytes::from_static(b"block")).await,
            Err(SequencerError::Rejected(_))
        ));
        assert!(log.is_empty());

        // The third injected failure was consumed by the last retry.
        seq.send(Bytes::from_static(b"block")).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn closed_is_not_retried() {
        let (inner, _log) = MemorySequencer::new();
        let mut seq = Retrying::new(inner, 5, Duration::from_secs(3600));
        seq.close().await.unwrap();
        // Would sleep for hours if Closed were retried.
        assert!(matches!(
            seq.send(Bytes::from_static(b"x")).await,
            Err(SequencerError::Closed)
        ));
    }
}
