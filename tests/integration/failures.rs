use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use orderer_core::wire::WIRE_VERSION;
use orderer_core::{verify_chain, ChainState, Status};
use orderer_services::{MemorySequencer, Retrying};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Backend failures
// ══════════════════════════════════════════════════════════════════════════════

/// A rejected block halts the cutter: the chain does not advance, the unsent
/// messages stay pending, and later requests are answered
/// SERVICE_UNAVAILABLE instead of being silently queued.
#[tokio::test]
async fn test_backend_failure_halts_and_refuses() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(2), ChainState::genesis()).await?;
    log.fail_always();

    let mut client = node.client().await?;
    assert_eq!(client.submit(b"a").await?, Status::Success);
    assert_eq!(client.submit(b"b").await?, Status::Success);

    let mut status = node.broadcaster.status_watcher();
    within("halt", status.wait_for(|s| s.halted.is_some())).await??;

    assert_eq!(client.submit(b"c").await?, Status::ServiceUnavailable);
    assert_eq!(client.submit(b"d").await?, Status::ServiceUnavailable);

    let snapshot = node.broadcaster.status();
    assert_eq!(snapshot.next_number, 1);
    assert_eq!(snapshot.pending, 2);
    assert_eq!(log.len(), 1);

    client.finish().await?;
    assert!(node.stop().await.is_err());
    Ok(())
}

/// Transient backend errors are absorbed by the retry decorator; the chain
/// comes out complete and linked.
#[tokio::test]
async fn test_retrying_backend_absorbs_transient_failures() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let seq = Retrying::new(seq, 3, Duration::from_millis(10));
    let node = Node::start(seq, size_only(2), ChainState::genesis()).await?;

    log.fail_next(2);
    let mut client = node.client().await?;
    for m in ["a", "b", "c", "d"] {
        assert_eq!(client.submit(m.as_bytes()).await?, Status::Success);
    }
    client.finish().await?;
    within("both blocks", log.wait_for(3)).await?;

    let chain = node.stop().await?.context("cutter never started")?;
    assert_eq!(verify_chain(log.blocks())?, chain);
    assert_eq!(payloads(&log.blocks())?.len(), 4);
    Ok(())
}

/// Genesis fails at boot; the first client session retries it before its
/// messages are accepted.
#[tokio::test]
async fn test_first_session_retries_failed_genesis() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    log.fail_next(1);
    let node = Node::start(seq, size_only(1), ChainState::genesis()).await?;
    assert!(log.is_empty());
    assert!(!node.broadcaster.status().started);

    let mut client = node.client().await?;
    assert_eq!(client.submit(b"first").await?, Status::Success);
    client.finish().await?;
    within("genesis and block 1", log.wait_for(2)).await?;

    let blocks = decode_all(&log.blocks())?;
    assert!(blocks[0].is_genesis());
    assert_eq!(blocks[1].messages, vec![msg("first")]);
    node.stop().await?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Transport failures
// ══════════════════════════════════════════════════════════════════════════════

/// A malformed frame ends that session only.
#[tokio::test]
async fn test_protocol_error_drops_only_that_session() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(1), ChainState::genesis()).await?;

    let mut healthy = node.client().await?;
    assert_eq!(healthy.submit(b"before").await?, Status::Success);

    let mut rogue = TcpStream::connect(node.addr).await?;
    rogue.write_all(&[WIRE_VERSION + 8, 0x01, 0, 0, 0, 0, 0, 0]).await?;
    let mut buf = [0u8; 4];
    let n = within("rogue disconnect", rogue.read(&mut buf)).await??;
    assert_eq!(n, 0, "server should close without replying");

    assert_eq!(healthy.submit(b"after").await?, Status::Success);
    healthy.finish().await?;

    within("both blocks", log.wait_for(3)).await?;
    assert_eq!(payloads(&log.blocks())?, vec![msg("before"), msg("after")]);
    node.stop().await?;
    Ok(())
}

/// A client vanishing mid-header is a transport error for that session;
/// its entry leaves the session table and the node keeps serving.
#[tokio::test]
async fn test_truncated_frame_is_cleaned_up() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(1), ChainState::genesis()).await?;

    {
        let mut partial = TcpStream::connect(node.addr).await?;
        partial.write_all(&[WIRE_VERSION, 0x01, 0]).await?;
    }

    within("session cleanup", async {
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if node.broadcaster.sessions().is_empty() {
                break;
            }
        }
    })
    .await?;

    let mut client = node.client().await?;
    assert_eq!(client.submit(b"still up").await?, Status::Success);
    client.finish().await?;
    within("block 1", log.wait_for(2)).await?;
    node.stop().await?;
    Ok(())
}
