//! `theia-collector`: binds the framed transport server to a configured
//! event store and runs until a shutdown signal arrives (§4.10, §4.11).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use theia_collector::{Args, Collector};
use theia_store::{EventStore, NaiveEventStore, RelationalEventStore};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.default_filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Option<Arc<dyn EventStore>> = if let Some(url) = &args.database_url {
        tracing::info!("connecting to relational event store");
        let store = RelationalEventStore::connect(url)
            .await
            .context("failed to connect to the relational event store")?;
        store
            .migrate()
            .await
            .context("failed to run relational store migration")?;
        Some(Arc::new(store))
    } else {
        tracing::info!(dir = %args.data_dir.display(), "opening naive event store");
        let store = Arc::new(
            NaiveEventStore::new(&args.data_dir, args.flush_interval())
                .with_context(|| format!("failed to open store at {}", args.data_dir.display()))?,
        );
        store.spawn_flusher();
        Some(store as Arc<dyn EventStore>)
    };

    let collector = Collector::new(store);
    let addr = args.bind_addr();

    let listener = collector
        .bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tokio::select! {
        result = collector.serve(listener) => {
            result.context("transport server exited with an error")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping collector");
            collector.stop().await;
        }
    }

    Ok(())
}

/// Resolves on `SIGINT`, `SIGTERM`, or `SIGHUP`. All three trigger the same
/// graceful stop; `SIGHUP`'s usual "reload config" meaning is deliberately
/// not implemented (§4.10).
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

    #[cfg(unix)]
    let hangup = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("failed to install SIGHUP handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = hangup => {},
    }
}
