//! # Harbor - Operator Entry Point
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - TOML file (optional) plus command-line overrides
//! 2. **Tracing** - `RUST_LOG` wins over the configured filter
//! 3. **Object Store** - in-memory store wrapped with tracing
//! 4. **Manager** - every controller in [`registrations`], sharing one store
//!
//! ## Shutdown
//!
//! Ctrl+C stops the manager. Reconciliations already running finish first;
//! queued keys are picked up again by the startup resync of the next run.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use harbor_core::OperatorConfig;
use harbor_reconciler::{ControllerRegistration, Manager, ManagerConfig};
use harbor_store::{
    Application, ApplicationContainer, ApplicationContainerPort, ApplicationSpec, InMemoryStore,
    ObjectStore, TracingStore,
};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_tracing(&config.logging.filter);

    info!("Harbor operator starting...");

    let store = init_store();
    if cli.seed_demo {
        seed_demo(store.as_ref())
            .await
            .context("Failed to seed the demo application")?;
    }

    let manager = registrations().into_iter().fold(
        Manager::new(store, ManagerConfig::from(&config)),
        Manager::register,
    );

    let stopper = manager.stopper();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        stopper.stop();
    });

    info!(
        workers = config.controller.workers,
        controllers = ?manager.controller_names(),
        "Harbor started in {:?}",
        start_time.elapsed()
    );

    manager.run().await.context("Manager exited with error")?;

    info!("Harbor stopped gracefully");
    Ok(())
}

/// Controllers this binary runs.
fn registrations() -> Vec<ControllerRegistration> {
    vec![ControllerRegistration::application()]
}

/// Load the configuration file, if any, and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<OperatorConfig> {
    let mut config = match &cli.config {
        Some(path) => OperatorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OperatorConfig::default(),
    };

    if let Some(workers) = cli.workers {
        config.controller.workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_store() -> Arc<dyn ObjectStore> {
    Arc::new(TracingStore::new(InMemoryStore::new()))
}

async fn seed_demo(store: &dyn ObjectStore) -> Result<()> {
    let app = Application::new(
        "ns",
        "x",
        ApplicationSpec {
            containers: vec![ApplicationContainer {
                name: "nginx".to_string(),
                image: "nginx:latest".to_string(),
                ports: vec![ApplicationContainerPort {
                    name: "default".to_string(),
                    host_port: 80,
                    container_port: 80,
                }],
                cpu_limit: "500m".to_string(),
                memory_limit: "128Mi".to_string(),
            }],
            replicas: Some(2),
        },
    );
    let created = store.create(app.into()).await?;
    info!(application = %created.key(), "Seeded demo application");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
