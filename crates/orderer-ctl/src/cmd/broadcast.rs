//! Submit messages over the broadcast stream.

use anyhow::{Context, Result};

use orderer_core::Status;
use orderer_services::BroadcastClient;

/// Send every message on one stream, then print the replies in order.
pub async fn cmd_broadcast(addr: &str, messages: &[&str]) -> Result<()> {
    let mut client = BroadcastClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to ordererd broadcast port at {}", addr))?;

    for msg in messages {
        client
            .send_request(msg.as_bytes())
            .await
            .context("failed to send request")?;
    }

    let mut accepted = 0;
    for (i, msg) in messages.iter().enumerate() {
        let status = client
            .recv_reply()
            .await
            .with_context(|| format!("no reply for message {}", i + 1))?;
        let mark = if status.is_success() { "✓" } else { "✗" };
        println!("  {} [{}] {} ({} bytes)", mark, i + 1, status, msg.len());
        if status == Status::Success {
            accepted += 1;
        }
    }
    client.finish().await.context("failed to close stream")?;

    println!();
    println!("{}/{} messages accepted.", accepted, messages.len());
    if accepted != messages.len() {
        anyhow::bail!("{} messages were rejected", messages.len() - accepted);
    }
    Ok(())
}
