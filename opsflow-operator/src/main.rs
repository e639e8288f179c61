//! The OpsFlow node inventory operator.

mod app;
mod config;
mod coordination;
mod error;
#[cfg(test)]
mod fixtures;
mod fleet;
mod grpc;
mod k8s;
mod metrics;
mod queue;
mod reporter;
mod scheduler;
mod utils;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;
use crate::metrics::register_metrics;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], cfg.metrics_port))
        .add_global_label("pod", cfg.pod_name.clone())
        .install()
        .context("error installing prometheus metrics exporter")?;
    register_metrics();

    tracing::info!(
        pod = %cfg.pod_name,
        queue = %cfg.queue_name,
        metrics_port = %cfg.metrics_port,
        "starting OpsFlow Operator",
    );
    if let Err(err) = App::new(cfg).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
