//! Pipeline Graph Signal Engine - Daemon
//!
//! Converts agent-pipeline execution records into trust and quality
//! signals: cluster statistics, integrity flags, per-request risk/quality
//! scores, and per-agent reliability metrics, with bounded caches in
//! front of the read paths. Recomputation jobs are triggered externally
//! over the authenticated HTTP boundary.

#![forbid(unsafe_code)]

mod caches;
mod events;
mod http_api;
mod integrity;
mod jobs;
mod metrics;
mod reliability;
mod scoring;
mod stats;
mod store;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use caches::SignalCaches;
use events::EventBus;
use gpg_common::GpgConfig;
use http_api::HttpState;
use integrity::IntegrityDetector;
use jobs::JobRunner;
use metrics::Metrics;
use reliability::ReliabilityEngine;
use scoring::SignalEngine;
use stats::ClusterStatsEngine;
use store::{ClusterDirectory, ExecutionStore};

#[derive(Parser)]
#[command(name = "gpgd")]
#[command(author, version, about = "Pipeline graph signal engine daemon")]
struct Cli {
    /// Port for the HTTP trigger/observability boundary
    #[arg(short, long, default_value = "8790")]
    port: u16,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting signal engine daemon...");

    let config = Arc::new(GpgConfig::from_env());
    if config.trigger_token.is_none() {
        warn!("GPG_TRIGGER_TOKEN is not set; job triggers and ingestion will be refused");
    }

    // All shared state is constructed once here and passed down; nothing
    // lives in module-level globals.
    let store = Arc::new(ExecutionStore::new());
    let clusters = Arc::new(ClusterDirectory::new());
    let caches = Arc::new(SignalCaches::new(&config));
    let metrics = Arc::new(Metrics::new()?);
    let events = EventBus::new(256);

    let runner = Arc::new(JobRunner::new(
        ClusterStatsEngine::new(
            Arc::clone(&store),
            Arc::clone(&clusters),
            config.stats_chunk_size,
        ),
        IntegrityDetector::new(Arc::clone(&clusters), Arc::clone(&config)),
        ReliabilityEngine::new(Arc::clone(&store), Arc::clone(&config)),
        Arc::clone(&caches),
        events.clone(),
        Arc::clone(&metrics),
        Arc::clone(&config),
    ));
    let engine = Arc::new(SignalEngine::new(Arc::clone(&clusters), Arc::clone(&config)));

    // Mirror job lifecycle events into the log.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(line) = event_rx.recv().await {
            info!(event = %line, "Engine event");
        }
    });

    let state = HttpState {
        store,
        runner,
        engine,
        caches,
        metrics,
        config,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };

    let router = http_api::create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router).await?;
    Ok(())
}
