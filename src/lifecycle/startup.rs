//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Build the gateway and start the eviction sweeper
//! - Bind the listener and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Traffic is served only once every subsystem is up
//! - The listener binds before the sweeper spawns, so a bind failure leaves
//!   no task behind

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, GuardConfig};
use crate::gateway::{GatewayError, SecurityGateway};
use crate::http::GuardServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::observability::{logging, metrics};
use crate::security::clock::SystemClock;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid {field} `{value}`")]
    Address { field: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load configuration from `config_path` and run the server until
/// SIGINT or SIGTERM.
pub async fn run(config_path: Option<&Path>) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        "request-guard starting"
    );

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_shutdown().await;
        trigger.trigger();
    });

    serve(config, shutdown).await
}

/// Everything after logging: metrics, gateway, sweeper, listener.
///
/// Returns once `shutdown` fires and in-flight requests have drained.
pub async fn serve(config: GuardConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address {
                field: "observability.metrics_address",
                value: config.observability.metrics_address.clone(),
            })?;
        metrics::init_metrics(addr)?;
    }

    let gateway = Arc::new(SecurityGateway::from_config(&config, Arc::new(SystemClock), None)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let address = listener.local_addr()?;

    let eviction = gateway
        .eviction_task(config.eviction.interval())
        .spawn(shutdown.subscribe());

    tracing::info!(
        address = %address,
        channels = config.channels.len(),
        forms = config.forms.len(),
        webhooks = config.webhooks.len(),
        "Listening for connections"
    );

    let served = GuardServer::new(gateway, &config)
        .run(listener, shutdown.subscribe())
        .await;

    // Stop the sweeper whether the server drained or failed.
    shutdown.trigger();
    if let Err(error) = eviction.await {
        tracing::warn!(error = %error, "Eviction task ended abnormally");
    }
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[tokio::test]
    async fn test_bind_failure_leaves_no_sweeper_running() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let toml = format!(
            r#"
            [listener]
            bind_address = "{}"

            [[channels]]
            name = "contact"
            capacity = 3
            refill_per_sec = 0.3
            "#,
            taken.local_addr().unwrap()
        );
        let config = parse_config(&toml, |_| None).unwrap();
        let shutdown = Shutdown::new();

        let result = serve(config, shutdown.clone()).await;
        assert!(matches!(result, Err(StartupError::Io(_))));
        assert_eq!(shutdown.receiver_count(), 0);
    }
}
