//! Core library for student performance prediction
//!
//! This crate provides:
//! - Validated student records and feature vectorization
//! - Lazy, once-per-backend loading of trained artifacts
//! - Random forest and neural network inference
//! - Per-feature attribution and the rule-based label override
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;

pub use error::PredictError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PredictorMetrics, StructuredLogger};
pub use predictor::{ExplainConfig, PredictorConfig, PredictorService};
