// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use goyais_core::resolve_runtime;
use goyais_hub::HubClient;
use goyais_model::{LiveTurnDriver, TurnDriver};
use goyais_node::{router, runtime_version, ClaimLoopService, NodeState, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = WorkerConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.no_claim_loop {
        config.disable_claim_loop = true;
    }

    let state = Arc::new(NodeState::from_env());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port))
        .await
        .with_context(|| format!("binding 127.0.0.1:{}", config.port))?;
    info!(
        port = config.port,
        version = %runtime_version(),
        worker_id = %config.worker_id,
        "worker HTTP surface listening"
    );

    let shutdown = CancellationToken::new();

    let claim_task = if config.disable_claim_loop {
        info!("claim loop disabled; serving HTTP only");
        None
    } else {
        let hub = Arc::new(HubClient::from_env().context("hub client configuration")?);
        let runtime = resolve_runtime(&config.runtime);
        info!(runtime = runtime.name(), hub = %hub.base_url(), "starting claim loop");
        let driver: Arc<dyn TurnDriver> = Arc::new(LiveTurnDriver);
        let service = ClaimLoopService::new(hub, config.clone(), runtime, driver);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { service.run(token).await }))
    };

    // Ctrl-C flips the shutdown token; the server and claim loop both
    // observe it and wind down in order.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("http server failed")?;

    shutdown.cancel();
    if let Some(task) = claim_task {
        let _ = task.await;
    }
    goyais_model::tls::cleanup_cached_bundle();
    info!("worker stopped");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
