use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod config;
mod engine;
mod error;
mod models;
mod proxy;
mod stealth;
mod storage;
mod utils;

use crate::config::Config;
use crate::engine::CrawlerEngine;
use crate::proxy::ProxyManager;
use crate::stealth::StealthEngine;
use crate::storage::MultiStorage;

/// The control API gets this long to drain in-flight requests on shutdown.
const SERVER_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about = "Crawl orchestrator daemon", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(args.verbose, args.log_file)?;

    info!("Starting crawlerd v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;

    // Any failure from here to engine start is fatal.
    let storage = MultiStorage::new(&config.storage)
        .await
        .context("Failed to initialize storage")?;

    let proxy_manager = Arc::new(
        ProxyManager::new(config.proxy.clone()).context("Failed to initialize proxy manager")?,
    );

    let stealth = Arc::new(StealthEngine::new(
        config.stealth.clone(),
        config.crawler.user_agent.clone(),
    ));

    let token = CancellationToken::new();
    let health_checker = proxy_manager.spawn_health_checker(token.child_token());

    let engine = Arc::new(CrawlerEngine::new(
        config.crawler.clone(),
        storage.clone(),
        proxy_manager.clone(),
        stealth,
    ));
    engine.start().await;

    let state = api::AppState {
        engine: engine.clone(),
        storage: storage.clone(),
        proxy_manager,
    };
    let app = api::create_routes(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind control API to {}", addr))?;
    info!("Control API listening on {}", addr);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        signal_token.cancel();
    });

    let serve_token = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutting down crawlerd");
            if timeout(SERVER_DRAIN_DEADLINE, &mut server).await.is_err() {
                warn!("Control API did not drain within the deadline");
                server.abort();
            }
        }
        result = &mut server => {
            result.context("Control API task failed")?.context("Control API server failed")?;
        }
    }

    engine.stop().await;
    token.cancel();
    let _ = health_checker.await;
    storage.close().await?;

    info!("crawlerd stopped");

    Ok(())
}
