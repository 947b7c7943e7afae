//! HTTP API for predictions, health checks and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use predictor_lib::{
    health::HealthRegistry,
    observability::PredictorMetrics,
    Backend, ExplanationMethod, FeatureContribution, Label, PredictError, PredictionResult,
    PredictorService, StudentInput,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<PredictorService>,
    pub health_registry: HealthRegistry,
    pub metrics: PredictorMetrics,
}

impl AppState {
    pub fn new(
        predictor: Arc<PredictorService>,
        health_registry: HealthRegistry,
        metrics: PredictorMetrics,
    ) -> Self {
        Self {
            predictor,
            health_registry,
            metrics,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: Label,
    pub confidence: f32,
    pub model_used: String,
    pub feature_contributions: Vec<FeatureContribution>,
    pub probabilities: Vec<f32>,
    pub explanation: ExplanationMethod,
    pub rule_augmented: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_confidence_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PredictResponse {
    fn new(result: PredictionResult, low_confidence_reason: Option<String>) -> Self {
        Self {
            prediction: result.label,
            confidence: result.confidence,
            model_used: result.model_used,
            feature_contributions: result.contributions,
            probabilities: result.probabilities,
            explanation: result.explanation,
            rule_augmented: result.rule_augmented,
            low_confidence_reason,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

fn detail(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// Missing artifacts and unknown backends are the caller's to fix (400);
/// everything else is reported as a server failure.
fn prediction_error(err: &PredictError) -> Response {
    if err.is_client_error() {
        detail(StatusCode::BAD_REQUEST, err.to_string())
    } else {
        detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Prediction failed: {}", err),
        )
    }
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Student Performance Analyzer API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PredictParams>,
    payload: Result<Json<StudentInput>, JsonRejection>,
) -> Response {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => return detail(rejection.status(), rejection.body_text()),
    };

    let selector = params
        .model_type
        .unwrap_or_else(|| Backend::default().selector().to_string());
    let backend = match selector.parse::<Backend>() {
        Ok(backend) => backend,
        Err(err) => {
            state.metrics.inc_prediction_errors(err.kind());
            return prediction_error(&err);
        }
    };

    let predictor = state.predictor.clone();
    let outcome =
        match tokio::task::spawn_blocking(move || predictor.predict_with(&input, backend)).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!(backend = %backend, error = %join_error, "Prediction task failed");
                return detail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Prediction failed: prediction task aborted",
                );
            }
        };

    state
        .health_registry
        .record_prediction_outcome(backend, &outcome)
        .await;

    match outcome {
        Ok(result) => {
            let reason = state.predictor.formatter().low_confidence_reason(&result);
            Json(PredictResponse::new(result, reason)).into_response()
        }
        Err(err) => prediction_error(&err),
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/predict", post(predict))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
