//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    chain: ChainInfo,
    batch: BatchInfo,
    backend: String,
    broadcast_addr: String,
    sessions: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct ChainInfo {
    next_number: u64,
    prev_hash: String,
    pending: usize,
    blocks_cut: u64,
    started: bool,
    halted: Option<String>,
}

#[derive(Deserialize)]
struct BatchInfo {
    max_messages: usize,
    period_ms: u64,
    queue_capacity: usize,
    max_message_bytes: usize,
}

pub async fn cmd_status(port: u16, raw: bool) -> Result<()> {
    let url = format!("{}/status", base_url(port));
    if raw {
        let value: serde_json::Value = get_json(&url).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let resp: StatusResponse = get_json(&url).await?;
    let chain = &resp.chain;
    let state = match (&chain.halted, chain.started) {
        (Some(_), _) => "HALTED",
        (None, true) => "running",
        (None, false) => "stopped",
    };
    let tip = if chain.prev_hash.is_empty() {
        "(none)"
    } else {
        chain.prev_hash.get(..16).unwrap_or(&chain.prev_hash)
    };

    println!("═══════════════════════════════════════");
    println!("  Orderer Status");
    println!("═══════════════════════════════════════");
    println!("  Cutter           : {}", state);
    println!("  Next block       : {}", chain.next_number);
    println!("  Tip hash         : {}", tip);
    println!("  Pending messages : {}", chain.pending);
    println!("  Blocks cut       : {}", chain.blocks_cut);
    println!("  Backend          : {}", resp.backend);
    println!("  Broadcast addr   : {}", resp.broadcast_addr);
    println!("  Active sessions  : {}", resp.sessions);
    println!("  Uptime           : {}s", resp.uptime_secs);
    println!();
    println!("  Batch size       : {}", resp.batch.max_messages);
    println!("  Batch period     : {}ms", resp.batch.period_ms);
    println!("  Queue capacity   : {}", resp.batch.queue_capacity);
    println!("  Max message      : {} bytes", resp.batch.max_message_bytes);

    if let Some(reason) = &chain.halted {
        println!();
        println!("  ✗ halted: {}", reason);
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
