use std::collections::HashMap;

use orderer_core::{verify_chain, ChainState, Status};
use orderer_services::MemorySequencer;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Broadcast: messages in, blocks out
// ══════════════════════════════════════════════════════════════════════════════

/// 25 messages at batch size 10 produce genesis plus blocks of 10, 10 and 5,
/// numbered and linked, with payloads in submission order.
#[tokio::test]
async fn test_size_cuts_over_tcp() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(10), ChainState::genesis()).await?;

    let mut client = node.client().await?;
    for i in 0..25 {
        assert_eq!(client.submit(format!("m{i}").as_bytes()).await?, Status::Success);
    }
    client.finish().await?;
    within("two full blocks", log.wait_for(3)).await?;

    let chain = node.stop().await?.context("cutter never started")?;
    assert_eq!(chain.next_number, 4);

    let blocks = decode_all(&log.blocks())?;
    let sizes: Vec<usize> = blocks.iter().map(|b| b.messages.len()).collect();
    assert_eq!(sizes, vec![1, 10, 10, 5]);

    let expected: Vec<Bytes> = (0..25).map(|i| msg(format!("m{i}"))).collect();
    assert_eq!(payloads(&log.blocks())?, expected);
    assert_eq!(verify_chain(log.blocks())?, chain);
    Ok(())
}

/// A partial batch is cut by the timer without any further traffic.
#[tokio::test]
async fn test_timer_cuts_partial_batch() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, settings(100, Duration::from_millis(100)), ChainState::genesis())
        .await?;

    let mut client = node.client().await?;
    for m in ["a", "b", "c"] {
        assert_eq!(client.submit(m.as_bytes()).await?, Status::Success);
    }
    within("timer cut", async {
        while payloads(&log.blocks()).map(|p| p.len()).unwrap_or(0) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(payloads(&log.blocks())?, vec![msg("a"), msg("b"), msg("c")]);

    // Idle periods after the cut add nothing.
    let cut = log.len();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(log.len(), cut);

    client.finish().await?;
    node.stop().await?;
    Ok(())
}

/// Concurrent sessions: every message is sequenced exactly once and each
/// client's messages keep their relative order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_deliver_exactly_once() -> Result<()> {
    const CLIENTS: usize = 8;
    const PER_CLIENT: usize = 50;

    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(7), ChainState::genesis()).await?;

    let mut tasks = Vec::new();
    for c in 0..CLIENTS {
        let mut client = node.client().await?;
        tasks.push(tokio::spawn(async move {
            for i in 0..PER_CLIENT {
                client.send_request(format!("{c}:{i}").as_bytes()).await?;
            }
            let mut statuses = Vec::new();
            for _ in 0..PER_CLIENT {
                statuses.push(client.recv_reply().await?);
            }
            client.finish().await?;
            Ok::<_, anyhow::Error>(statuses)
        }));
    }
    for task in tasks {
        let statuses = task.await??;
        assert!(statuses.iter().all(|s| *s == Status::Success));
    }

    let chain = node.stop().await?.context("cutter never started")?;
    let all = payloads(&log.blocks())?;
    assert_eq!(all.len(), CLIENTS * PER_CLIENT);
    assert_eq!(verify_chain(log.blocks())?, chain);

    let mut next: HashMap<usize, usize> = HashMap::new();
    for payload in &all {
        let text = std::str::from_utf8(payload)?;
        let (c, i) = text.split_once(':').context("bad payload")?;
        let (c, i): (usize, usize) = (c.parse()?, i.parse()?);
        let expected = next.entry(c).or_insert(0);
        assert_eq!(i, *expected, "client {c} out of order");
        *expected += 1;
    }
    assert!(next.values().all(|n| *n == PER_CLIENT));
    Ok(())
}

/// Oversized payloads are refused per request; empty payloads are valid
/// messages. The session continues either way.
#[tokio::test]
async fn test_payload_limits() -> Result<()> {
    let (seq, log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(2), ChainState::genesis()).await?;

    let mut client = node.client().await?;
    assert_eq!(client.submit(b"").await?, Status::Success);
    assert_eq!(client.submit(&[7u8; 4097]).await?, Status::BadRequest);
    assert_eq!(client.submit(&[7u8; 4096]).await?, Status::Success);
    client.finish().await?;

    within("block 1", log.wait_for(2)).await?;
    node.stop().await?;

    let got = payloads(&log.blocks())?;
    assert_eq!(got.len(), 2);
    assert!(got[0].is_empty());
    assert_eq!(got[1].len(), 4096);
    Ok(())
}

/// Session counters are visible while the stream is open and the entry is
/// removed when the client half-closes.
#[tokio::test]
async fn test_session_table_tracks_streams() -> Result<()> {
    let (seq, _log) = MemorySequencer::new();
    let node = Node::start(seq, size_only(10), ChainState::genesis()).await?;

    let mut client = node.client().await?;
    client.submit(b"one").await?;
    client.submit(&[0u8; 5000]).await?;

    {
        let sessions = node.broadcaster.sessions();
        assert_eq!(sessions.len(), 1);
        let info = sessions.iter().next().context("no session")?;
        assert_eq!((info.received, info.accepted, info.rejected), (2, 1, 1));
    }

    client.finish().await?;
    within("session removal", async {
        while !node.broadcaster.sessions().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    node.stop().await?;
    Ok(())
}
