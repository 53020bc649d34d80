//! Discovery gateway.
//!
//! Fronts a set of dependency services discovered through a coordination
//! store and announces itself in the same store.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────┐
//!                          │                   GATEWAY                    │
//!   POST /api/{svc}/{m}    │  ┌────────┐   ┌─────────┐   ┌─────────────┐  │
//!  ────────────────────────┼─▶│  http  │──▶│ routing │──▶│   backend   │──┼──▶ dependency
//!                          │  │ server │   │ router  │   │    cache    │  │    (HTTP/2)
//!                          │  └────────┘   └─────────┘   └──────┬──────┘  │
//!                          │                                    │         │
//!                          │          ┌──────────────┐   ┌──────▼──────┐  │
//!                          │          │  resilience  │◀──│  discovery  │  │
//!                          │          │   breaker    │   │ scan/watch  │  │
//!                          │          └──────────────┘   └──────┬──────┘  │
//!                          │                                    │         │
//!                          │          ┌──────────────┐          │         │
//!                          │          │  registrar   │──────────┤         │
//!                          │          │ lease/renew  │          │         │
//!                          │          └──────────────┘          ▼         │
//!                          └──────────────────────────── coordination store
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use discovery_gateway::config::{default_config, load_config};
use discovery_gateway::lifecycle::{connect_store, wait_for_signal, Gateway};
use discovery_gateway::observability::{logging, metrics};
use discovery_gateway::transport::{H2Connector, H2Settings};

#[derive(Debug, Parser)]
#[command(name = "discovery-gateway", version, about)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "discovery-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.backend,
        dependencies = config.dependencies.len(),
        registration = config.registration.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let store = connect_store(&config.store).await?;
    let connector = Arc::new(H2Connector::new(H2Settings::from(&config.transport)));
    let gateway = Gateway::start(&config, store, connector).await?;

    match wait_for_signal().await {
        Ok(signal) => tracing::info!(signal, "Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Signal handler failed, shutting down"),
    }

    gateway.shutdown().await;
    Ok(())
}
