//! wharfd - the Wharf image service daemon.
//!
//! Serves image operations over a Unix domain socket, backed by the local
//! image store, registry transports and the Dockerfile builder.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use wharf_core::config::expand_home;
use wharf_core::{init_tracing, LogFormat, WharfConfig};
use wharf_runtime::{DockerfileBuilder, LocalImageStore, TransportResolver};
use wharf_server::{ImageService, ServiceConfig, WharfServer};

/// Wharf image service
#[derive(Parser, Debug)]
#[command(name = "wharfd", version, about = "Wharf image service daemon")]
struct Args {
    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Root of the local image store.
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Registry to search (repeatable; replaces the configured list).
    #[arg(long = "registry")]
    registries: Vec<String>,

    /// Default log filter (RUST_LOG takes precedence).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: text or json.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Args {
    /// Load the configuration file, then apply flag overrides.
    fn into_config(self) -> anyhow::Result<WharfConfig> {
        let mut config = match &self.config {
            Some(path) => WharfConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => {
                let mut config = WharfConfig::default();
                config.expand_paths();
                config
            }
        };
        if let Some(socket) = self.socket {
            config.socket_path = expand_home(&socket);
        }
        if let Some(store_dir) = self.store_dir {
            config.store_dir = expand_home(&store_dir);
        }
        if !self.registries.is_empty() {
            config.registries = self.registries;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_tracing(&config.log);

    tracing::info!(
        version = wharf_server::VERSION,
        socket = %config.socket_path.display(),
        store_dir = %config.store_dir.display(),
        registries = ?config.registries,
        "Starting Wharf image service"
    );

    let store = Arc::new(
        LocalImageStore::new(&config.store_dir).with_context(|| {
            format!(
                "Failed to initialize image store at {}",
                config.store_dir.display()
            )
        })?,
    );
    let transport = Arc::new(TransportResolver::new(store.clone()));
    let builder = Arc::new(DockerfileBuilder::new(store.clone(), transport.clone()));
    let service = Arc::new(ImageService::new(
        store,
        transport,
        builder,
        ServiceConfig::from(&config),
    ));

    let server = WharfServer::new(config.socket_path.clone(), service);
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        tracing::debug!(error = %e, "Failed to remove socket file");
    }
    Ok(())
}
