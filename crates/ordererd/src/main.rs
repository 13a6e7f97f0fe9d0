//! ordererd: broadcast ingestion and batching daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use orderer_core::config::OrdererConfig;
use orderer_core::ChainState;
use orderer_services::sequencer::{self, Sequencer};
use orderer_services::{tcp, BroadcastSettings, Broadcaster};

#[tokio::main]
async fn main() -> Result<()> {
    // Config is read before logging so `log.level` can seed the filter.
    let default_written = OrdererConfig::write_default_if_missing();
    let config = OrdererConfig::load();

    let level = config
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if let Err(e) = default_written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = config.context("failed to load config")?;
    tracing::info!(
        config = %OrdererConfig::file_path().display(),
        batch_size = config.batch.size,
        period_ms = config.batch.period_ms,
        "ordererd starting"
    );

    // ── Sequencer and chain tip ──────────────────────────────────────────────

    let mut sequencer = sequencer::open(&config.sequencer).context("failed to open sequencer")?;
    let chain = match sequencer.tip().await.context("failed to read chain tip")? {
        Some(tip) => ChainState::after(&tip).context("backend tip is not a valid block")?,
        None => ChainState::genesis(),
    };
    tracing::info!(
        next_number = chain.next_number,
        prev_hash = %chain.prev_hash_hex(),
        "chain state loaded"
    );

    let settings = BroadcastSettings::from_config(&config);
    let broadcaster = Arc::new(Broadcaster::new(sequencer, settings, chain));

    // A failed genesis is retried by the first client session.
    if let Err(e) = broadcaster.start().await {
        tracing::error!(error = %e, "cutter did not start");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener = TcpListener::bind((config.network.bind_addr.as_str(), config.network.broadcast_port))
        .await
        .with_context(|| {
            format!(
                "failed to bind broadcast listener on {}:{}",
                config.network.bind_addr, config.network.broadcast_port
            )
        })?;
    let broadcast_addr = listener.local_addr()?.to_string();

    let listener_task = tokio::spawn(tcp::serve(
        listener,
        broadcaster.clone(),
        shutdown_tx.subscribe(),
    ));

    let api_task = {
        let state = orderer_api::ApiState::new(&broadcaster, broadcast_addr, shutdown_tx.clone());
        let port = config.network.api_port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = orderer_api::serve(state, port, shutdown).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    let _halt_watcher = {
        let mut status = broadcaster.status_watcher();
        tokio::spawn(async move {
            if let Ok(s) = status.wait_for(|s| s.halted.is_some()).await {
                tracing::error!(
                    next_number = s.next_number,
                    pending = s.pending,
                    reason = s.halted.as_deref().unwrap_or_default(),
                    "cutter halted; clients receive SERVICE_UNAVAILABLE until restart"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("broadcast listener exited: {:?}", r),
        r = api_task           => tracing::error!("status server exited: {:?}", r),
    }
    let _ = shutdown_tx.send(());

    match broadcaster.close().await {
        Ok(Some(chain)) => tracing::info!(
            next_number = chain.next_number,
            prev_hash = %chain.prev_hash_hex(),
            "cutter stopped"
        ),
        Ok(None) => tracing::info!("cutter was never started"),
        Err(e) => tracing::error!(error = %e, "cutter stopped with error"),
    }

    Ok(())
}
