use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use sawcas::{FileStore, SharedStore};
use sawmill::{broker::Broker, config::SawmillConfig, server, telemetry, AppState};

/// Remote build execution service backed by a content-addressed store.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory backing the blob store (the cache bucket).
    #[arg(long)]
    bucket: Option<PathBuf>,

    /// Logging verbosity: panic|fatal|error|warn|info|debug.
    #[arg(long, default_value = "warn")]
    verbosity: String,

    /// Bind address for the RPC surface.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Optional TOML config file with a [sawmill] section.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.verbosity)?;

    let mut config = match (&cli.config, &cli.bucket) {
        (Some(path), _) => SawmillConfig::from_file(path)?,
        (None, Some(bucket)) => SawmillConfig::with_bucket(bucket),
        (None, None) => SawmillConfig::from_env()?,
    };
    if let Some(bucket) = cli.bucket {
        config.bucket = bucket;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let store: SharedStore = Arc::new(
        FileStore::open(config.bucket.clone())
            .with_context(|| format!("opening bucket {}", config.bucket.display()))?,
    );
    let broker = Broker::new();
    let state = Arc::new(AppState::new(&config, store, broker));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    tracing::info!(addr = %config.listen, bucket = %config.bucket.display(), "listening");

    tokio::select! {
        result = server::serve(listener, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
