//! Performance server - student performance prediction service
//!
//! Serves predictions from the trained tree and neural backends together
//! with per-feature attributions, health checks and Prometheus metrics.

use anyhow::Result;
use performance_server::{api, config::ServerConfig};
use predictor_lib::{
    health::{backend_component, components, HealthRegistry},
    observability::{PredictorMetrics, StructuredLogger},
    PredictorService,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting performance-server");

    let config = ServerConfig::load()?;
    info!(
        models_dir = %config.models_dir,
        api_port = config.api_port,
        explain_enabled = config.explain_enabled,
        rule_override = config.rule_override,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::TREE_BACKEND).await;
    health_registry.register(components::NEURAL_BACKEND).await;
    health_registry.register(components::EXPLAINER).await;

    let metrics = PredictorMetrics::new();
    let logger = StructuredLogger::new("performance-server");
    let predictor = Arc::new(PredictorService::new(config.predictor_config()));

    if config.preload_models {
        let warm = predictor.clone();
        let outcomes = tokio::task::spawn_blocking(move || warm.warm_up()).await?;
        for (backend, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(backend = %backend, error = %e, "Backend unavailable at startup");
                health_registry
                    .set_degraded(backend_component(backend), e.to_string())
                    .await;
            }
        }
    }

    logger.log_startup(SERVER_VERSION, &config.models_dir);

    let app_state = Arc::new(api::AppState::new(
        predictor,
        health_registry.clone(),
        metrics,
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            logger.log_shutdown("API server stopped");
            served??;
        }
    }

    info!("Shutting down");
    Ok(())
}
