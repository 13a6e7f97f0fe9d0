//! Session listing and inspection.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct SessionEntry {
    id: u64,
    peer: String,
    uptime_secs: u64,
    received: u64,
    accepted: u64,
    rejected: u64,
}

#[derive(Deserialize)]
struct SessionsResponse {
    sessions: Vec<SessionEntry>,
}

fn print_session(s: &SessionEntry) {
    println!("  ┌─ session {}", s.id);
    println!("  │  peer     : {}", s.peer);
    println!("  │  received : {}", s.received);
    println!("  │  accepted : {}", s.accepted);
    println!("  │  rejected : {}", s.rejected);
    println!("  └─ uptime   : {}s", s.uptime_secs);
}

pub async fn cmd_sessions(port: u16) -> Result<()> {
    let resp: SessionsResponse = get_json(&format!("{}/sessions", base_url(port))).await?;

    if resp.sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Active Sessions ({})", resp.sessions.len());
    println!("═══════════════════════════════════════");
    for s in &resp.sessions {
        print_session(s);
    }
    Ok(())
}

pub async fn cmd_session_inspect(port: u16, id: u64) -> Result<()> {
    let s: SessionEntry = get_json(&format!("{}/sessions/{}", base_url(port), id)).await?;
    print_session(&s);
    Ok(())
}
