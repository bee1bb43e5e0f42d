//! Ollama request router.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                  ROUTER                      │
//!                    │                                              │
//!  POST /api/chat    │  ┌─────────┐    ┌──────────┐    ┌─────────┐  │
//!  POST /api/generate┼─▶│  http   │───▶│  relay   │───▶│ broker  │  │
//!                    │  │ server  │    │          │◀───│  pool   │  │
//!                    │  └─────────┘    └────┬─────┘    └─────────┘  │
//!                    │                      │ lease                 │
//!                    │                      ▼                       │
//!  streamed chunks   │  ┌─────────┐    ┌──────────┐                 │
//!  ◀─────────────────┼──│ 4 KiB   │◀───│ upstream │◀────────────────┼──── Ollama
//!                    │  │ frames  │    │ client   │                 │     servers
//!                    │  └─────────┘    └──────────┘                 │
//!                    └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use ollama_router::config::{resolve_config, ConfigOverrides};
use ollama_router::http::HttpServer;
use ollama_router::lifecycle::{signals, Shutdown};
use ollama_router::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "ollama-router")]
#[command(about = "Least-loaded streaming router for Ollama servers", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the backend list (repeatable).
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Override the per-server concurrency limit.
    #[arg(long)]
    max_concurrent: Option<usize>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_address: self.bind.clone(),
            servers: self.servers.clone(),
            max_concurrent_per_server: self.max_concurrent,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref(), &cli.overrides())?;

    logging::init(&config.observability.log_level);
    tracing::info!("ollama-router v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        servers = config.ollama.servers.len(),
        max_concurrent_per_server = config.ollama.max_concurrent_per_server,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.token()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
