use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use orderer_core::{verify_chain, ChainState, Status};
use orderer_services::sequencer::read_log;
use orderer_services::{FileSequencer, Sequencer, SqliteSequencer};

use crate::*;

/// Chain state to resume from, as the daemon computes it at boot.
async fn resume_point<S: Sequencer>(seq: &mut S) -> Result<ChainState> {
    Ok(match seq.tip().await? {
        Some(tip) => ChainState::after(&tip)?,
        None => ChainState::genesis(),
    })
}

async fn submit_all<S: Sequencer>(node: &Node<S>, msgs: &[&str]) -> Result<()> {
    let mut client = node.client().await?;
    for m in msgs {
        assert_eq!(client.submit(m.as_bytes()).await?, Status::Success);
    }
    client.finish().await?;
    Ok(())
}

/// Run one node over the file log at `path`, submit `msgs`, stop it.
async fn file_session(path: &Path, max: usize, msgs: &[&str]) -> Result<ChainState> {
    let mut seq = FileSequencer::open(path)?;
    let chain = resume_point(&mut seq).await?;
    let node = Node::start(seq, size_only(max), chain).await?;
    submit_all(&node, msgs).await?;
    node.stop().await?.context("cutter never started")
}

// ══════════════════════════════════════════════════════════════════════════════
//  Restart against a persistent backend
// ══════════════════════════════════════════════════════════════════════════════

/// A restarted node continues the chain: no second genesis, numbering and
/// hash links carry across the restart.
#[tokio::test]
async fn test_file_backend_resumes_chain() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("orderer").join("blocks.log");

    let first = file_session(&path, 2, &["a", "b", "c"]).await?;
    assert_eq!(first.next_number, 3);

    let second = file_session(&path, 2, &["d", "e"]).await?;
    assert_eq!(second.next_number, 4);

    let log = read_log(&path)?;
    assert_eq!(log.torn_bytes, 0);
    assert_eq!(verify_chain(&log.blocks)?, second);

    let blocks = decode_all(&log.blocks)?;
    assert_eq!(blocks.iter().filter(|b| b.is_genesis()).count(), 1);
    assert_eq!(
        payloads(&log.blocks)?,
        vec![msg("a"), msg("b"), msg("c"), msg("d"), msg("e")]
    );
    Ok(())
}

/// A torn record left by a crash is dropped at open and the chain continues
/// from the last complete block.
#[tokio::test]
async fn test_resume_after_torn_tail() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("blocks.log");

    let first = file_session(&path, 1, &["x", "y"]).await?;
    assert_eq!(first.next_number, 3);

    // Length prefix promising 64 bytes, followed by only 3.
    {
        let mut f = OpenOptions::new().append(true).open(&path)?;
        f.write_all(&64u32.to_le_bytes())?;
        f.write_all(b"abc")?;
    }
    assert_eq!(read_log(&path)?.torn_bytes, 7);

    let second = file_session(&path, 1, &["z"]).await?;
    assert_eq!(second.next_number, 4);

    let log = read_log(&path)?;
    assert_eq!(log.torn_bytes, 0);
    assert_eq!(verify_chain(&log.blocks)?, second);
    assert_eq!(payloads(&log.blocks)?, vec![msg("x"), msg("y"), msg("z")]);
    Ok(())
}

/// Same restart contract on the SQLite backend.
#[tokio::test]
async fn test_sqlite_backend_resumes_chain() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("blocks.db");

    for batch in [&["a", "b"][..], &["c", "d"]] {
        let mut seq = SqliteSequencer::open(&path)?;
        let chain = resume_point(&mut seq).await?;
        let node = Node::start(seq, size_only(2), chain).await?;
        submit_all(&node, batch).await?;
        node.stop().await?;
    }

    let blocks = SqliteSequencer::open(&path)?.read_all().await?;
    assert_eq!(verify_chain(&blocks)?.next_number, 3);
    assert!(decode_all(&blocks)?[0].is_genesis());
    assert_eq!(
        payloads(&blocks)?,
        vec![msg("a"), msg("b"), msg("c"), msg("d")]
    );
    Ok(())
}

/// Messages acked but not yet cut when the node stops are cut into a final
/// partial block, not lost.
#[tokio::test]
async fn test_shutdown_flushes_partial_batch() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("blocks.log");

    let chain = file_session(&path, 10, &["p", "q", "r"]).await?;
    assert_eq!(chain.next_number, 2);

    let log = read_log(&path)?;
    let blocks = decode_all(&log.blocks)?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].messages, vec![msg("p"), msg("q"), msg("r")]);
    Ok(())
}
