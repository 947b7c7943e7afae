//! Health check infrastructure for the predictor
//!
//! Tracks the state of both backends and the explainer for the liveness and
//! readiness endpoints.

use crate::error::PredictError;
use crate::models::{Backend, ExplanationMethod, PredictionResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, e.g. one backend lacks artifacts
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The overall status is the worst component status
    pub fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = worst_status(&components);
        Self { status, components }
    }
}

fn worst_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
    components
        .values()
        .map(|c| c.status)
        .max()
        .unwrap_or(ComponentStatus::Healthy)
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const TREE_BACKEND: &str = "tree_backend";
    pub const NEURAL_BACKEND: &str = "neural_backend";
    pub const EXPLAINER: &str = "explainer";
}

/// Health component that tracks a backend's artifacts
pub fn backend_component(backend: Backend) -> &'static str {
    match backend {
        Backend::Tree => components::TREE_BACKEND,
        Backend::Neural => components::NEURAL_BACKEND,
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
    /// Backend whose attribution fallback degraded the explainer
    explainer_degraded_by: Option<Backend>,
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentHealth::healthy()).await;
    }

    pub async fn set(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Fold the outcome of one prediction into component health.
    ///
    /// Missing artifacts degrade the backend rather than failing it: the
    /// other backend keeps serving and the operator can fix it offline.
    /// Other prediction errors leave health untouched. The explainer stays
    /// degraded until the backend that fell back explains successfully.
    pub async fn record_prediction_outcome(
        &self,
        backend: Backend,
        outcome: &Result<PredictionResult, PredictError>,
    ) {
        let component = backend_component(backend);
        let mut state = self.state.write().await;
        match outcome {
            Ok(result) => {
                state
                    .components
                    .insert(component.to_string(), ComponentHealth::healthy());
                if result.explanation == ExplanationMethod::Fallback {
                    state.explainer_degraded_by = Some(backend);
                    state.components.insert(
                        components::EXPLAINER.to_string(),
                        ComponentHealth::degraded(format!(
                            "{} attribution fell back to zero contributions",
                            backend
                        )),
                    );
                } else if state.explainer_degraded_by == Some(backend) {
                    // only the backend that fell back can clear it
                    state.explainer_degraded_by = None;
                    state
                        .components
                        .insert(components::EXPLAINER.to_string(), ComponentHealth::healthy());
                }
            }
            Err(err @ PredictError::ArtifactsUnavailable { .. }) => {
                state
                    .components
                    .insert(component.to_string(), ComponentHealth::degraded(err.to_string()));
            }
            Err(_) => {}
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse::from_components(state.components.clone())
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Predictor not yet started")
        } else if !worst_status(&state.components).is_operational() {
            Some("A backend or the explainer is unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
