//! Registry server binary.

use std::path::PathBuf;

use clap::Parser;
use registry::RegistryBuilder;
use registry::config::{LogFormat, LoggingConfig, RegistryConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const DEFAULT_CONFIG: &str = "registry.toml";

/// Serve a container registry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file. `registry.toml` is used when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind, overriding the configuration file.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,
}

impl Args {
    fn load(&self) -> Result<RegistryConfig, registry::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => RegistryConfig::from_path(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG).exists() => {
                RegistryConfig::from_path(std::path::Path::new(DEFAULT_CONFIG))?
            }
            None => RegistryConfig::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        Ok(config)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let output = match logging.format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.load()?;
    init_tracing(&config.logging);

    tracing::debug!(?config, "Loaded configuration");
    let storage = config.storage.clone().build().await?;
    tracing::info!(driver = storage.name(), bucket = %config.registry.bucket, "Opened storage");

    let app = RegistryBuilder::new()
        .config(&config)
        .storage(storage)
        .build();

    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Registry listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
