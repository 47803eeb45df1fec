//! relayd: an HTTP reverse proxy that routes by hostname to dynamically discovered backends.
//!
//! This binary:
//! - Loads configuration from a TOML file
//! - Builds the routing-table store and runs an initial reload (fatal on failure)
//! - Listens for store change notifications and re-reloads on each one
//! - Serves HTTP on the configured listener, forwarding by hostname
//! - Flushes StatsD counters on a fixed interval

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::any;
use axum::Router;
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay_proxy::config::Cli;
use relay_proxy::discovery::{ChannelSource, KvWatchListener};
use relay_proxy::store::memory::MemoryStore;
use relay_proxy::{empty_handle, AppState, Config, ReloadPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        bind_addr = %config.listener.bind_addr,
        store_endpoint = %config.store.endpoint,
        "starting relayd"
    );

    let config = Arc::new(config);

    let (store, changes) = MemoryStore::new();
    let snapshot = empty_handle();
    let http_client = reqwest::Client::new();

    let pipeline = Arc::new(ReloadPipeline::new(
        store,
        snapshot.clone(),
        config.health_check.interval,
        http_client.clone(),
    ));

    // The initial load must succeed: an empty routing table serving traffic silently is worse
    // than refusing to start.
    pipeline
        .reload()
        .await
        .context("initial routing table load failed")?;

    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
    let (watch_stop_tx, watch_stop_rx) = oneshot::channel();
    let watch_listener = Arc::new(KvWatchListener::new(ChannelSource(changes)));
    let watch_task = tokio::spawn({
        let watch_listener = watch_listener.clone();
        async move { watch_listener.run(trigger_tx, watch_stop_rx).await }
    });

    let reload_task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            while trigger_rx.recv().await.is_some() {
                if let Err(err) = pipeline.reload().await {
                    error!(error = %err, "reload failed, keeping previous snapshot");
                }
            }
        }
    });

    let metrics = Arc::new(
        relay_proxy::metrics::MetricsSink::connect(
            config.metrics.endpoint.clone(),
            config.metrics.prefix.clone(),
        )
        .await
        .context("failed to bind metrics socket")?,
    );
    metrics.clone().spawn_flush_loop();

    let state = Arc::new(AppState {
        snapshot: snapshot.clone(),
        config: config.clone(),
        metrics,
        http_client,
    });

    let app = Router::new()
        .fallback(any(relay_proxy::forward::handle))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listener.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listener.bind_addr))?;

    info!(addr = %config.listener.bind_addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("shutting down: draining current snapshot's frontends");
    snapshot.load_full().stop_all().await;

    let _ = watch_stop_tx.send(());
    let _ = watch_task.await;
    reload_task.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
