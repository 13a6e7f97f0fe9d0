//! orderer-ctl: command-line interface for the orderer daemon.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_API_PORT: u16 = 7051;
const DEFAULT_BROADCAST_ADDR: &str = "127.0.0.1:7050";

fn print_usage() {
    println!("Usage: orderer-ctl [--port <port>] [--addr <host:port>] <command>");
    println!();
    println!("Commands:");
    println!("  status [--json]          Show cutter state, chain tip and settings");
    println!("  sessions                 List active broadcast sessions");
    println!("  sessions <id>            Inspect one session");
    println!("  broadcast <message>...   Submit messages on one stream");
    println!("  verify <log-file>        Check numbering and hash links of a block log");
    println!("  shutdown                 Gracefully stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>        Status API port (default: {})", DEFAULT_API_PORT);
    println!("  --addr <host:port>   Broadcast address (default: {})", DEFAULT_BROADCAST_ADDR);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_API_PORT;
    let mut addr = DEFAULT_BROADCAST_ADDR.to_string();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--addr" => {
                i += 1;
                addr = args.get(i).context("--addr requires a value")?.clone();
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port, false).await,
        ["status", "--json"] => cmd::status::cmd_status(port, true).await,
        ["sessions"] => cmd::sessions::cmd_sessions(port).await,
        ["sessions", id] => {
            let id = id.parse().context("session id must be a number")?;
            cmd::sessions::cmd_session_inspect(port, id).await
        }
        ["broadcast", messages @ ..] if !messages.is_empty() => {
            cmd::broadcast::cmd_broadcast(&addr, messages).await
        }
        ["verify", path] => cmd::verify::cmd_verify(path).await,
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
