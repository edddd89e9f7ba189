//! Startup helpers for the Atelier agent server.
//!
//! Reads configuration from `ATELIER_*` environment variables. A missing
//! backend endpoint is not fatal: the server starts unconfigured and answers
//! every chat with an explanation.

use std::process::ExitCode;
use std::sync::Arc;

use crate::chat::CacheMaintenance;
use crate::config::{AtelierConfig, ConfigResult};
use crate::server::{self, AppState};

/// Run the server (used by the `atelier-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Atelier agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let state = match AppState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };
    if !state.coordinator.is_configured() {
        tracing::warn!("Agent backend or worker not configured; chat will explain instead of answering");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(async move {
        let maintenance = CacheMaintenance::new(
            Arc::clone(&state.coordinator),
            config.cache.cleanup_interval,
        );
        let stop_maintenance = maintenance.shutdown_notifier();
        let maintenance_task = maintenance.spawn();

        let result =
            server::run_server_with_shutdown(state, config.server.port, shutdown_signal()).await;

        stop_maintenance.notify_one();
        if let Err(e) = maintenance_task.await {
            tracing::warn!("Cache maintenance task ended abnormally: {e}");
        }
        result
    });

    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("Atelier agent stopped");
    ExitCode::SUCCESS
}

/// Load and validate configuration from the environment.
///
/// # Errors
/// Returns an error if a variable is malformed or a value is out of range.
pub fn load_config() -> ConfigResult<AtelierConfig> {
    let config = AtelierConfig::from_env()?;
    config.validate()?;
    if let Some(endpoint) = &config.backend.endpoint {
        tracing::info!("Agent backend endpoint: {endpoint}");
    }
    Ok(config)
}

/// Resolve when ctrl-c is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
