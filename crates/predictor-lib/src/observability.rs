//! Observability infrastructure for the predictor
//!
//! Provides:
//! - Prometheus metrics (prediction latency, predictions per label, explanation fallbacks, artifact state)
//! - Structured JSON logging with tracing

use crate::models::{Backend, ExplanationMethod, Label};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PredictorMetricsInner> = OnceLock::new();

struct PredictorMetricsInner {
    prediction_latency_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    prediction_errors_total: IntCounterVec,
    explanation_fallbacks_total: IntCounterVec,
    rule_overrides_total: IntCounter,
    artifacts_loaded: IntGaugeVec,
}

impl PredictorMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram_vec!(
                "spa_prediction_latency_seconds",
                "Time spent producing a prediction, including explanation",
                &["backend"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_total: register_int_counter_vec!(
                "spa_predictions_total",
                "Predictions served, by backend and final label",
                &["backend", "label"]
            )
            .expect("Failed to register predictions_total"),

            prediction_errors_total: register_int_counter_vec!(
                "spa_prediction_errors_total",
                "Failed predictions, by error kind",
                &["kind"]
            )
            .expect("Failed to register prediction_errors_total"),

            explanation_fallbacks_total: register_int_counter_vec!(
                "spa_explanation_fallbacks_total",
                "Predictions whose attribution fell back to zero contributions",
                &["backend"]
            )
            .expect("Failed to register explanation_fallbacks_total"),

            rule_overrides_total: register_int_counter!(
                "spa_rule_overrides_total",
                "Predictions upgraded by the rule-based override"
            )
            .expect("Failed to register rule_overrides_total"),

            artifacts_loaded: register_int_gauge_vec!(
                "spa_artifacts_loaded",
                "1 when the artifact set of a backend is loaded",
                &["backend"]
            )
            .expect("Failed to register artifacts_loaded"),
        }
    }
}

/// Predictor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Debug, Clone)]
pub struct PredictorMetrics {
    _private: (),
}

impl Default for PredictorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PredictorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PredictorMetricsInner {
        GLOBAL_METRICS.get_or_init(PredictorMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, backend: Backend, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&[backend.selector()])
            .observe(duration_secs);
    }

    pub fn inc_predictions(&self, backend: Backend, label: Label) {
        self.inner()
            .predictions_total
            .with_label_values(&[backend.selector(), label.as_str()])
            .inc();
    }

    pub fn inc_prediction_errors(&self, kind: &str) {
        self.inner()
            .prediction_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_explanation_fallbacks(&self, backend: Backend) {
        self.inner()
            .explanation_fallbacks_total
            .with_label_values(&[backend.selector()])
            .inc();
    }

    pub fn inc_rule_overrides(&self) {
        self.inner().rule_overrides_total.inc();
    }

    pub fn set_artifacts_loaded(&self, backend: Backend, loaded: bool) {
        self.inner()
            .artifacts_loaded
            .with_label_values(&[backend.selector()])
            .set(i64::from(loaded));
    }
}

/// Structured logger for predictor events
///
/// Provides consistent JSON-formatted logging for predictions, artifact
/// loading and service lifecycle.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log a served prediction
    #[allow(clippy::too_many_arguments)]
    pub fn log_prediction(
        &self,
        backend: Backend,
        label: Label,
        confidence: f32,
        model_used: &str,
        explanation: ExplanationMethod,
        rule_augmented: bool,
        elapsed_ms: f64,
    ) {
        info!(
            event = "prediction_generated",
            service = %self.service,
            backend = %backend,
            label = %label,
            confidence = confidence,
            model_used = %model_used,
            explanation = ?explanation,
            rule_augmented = rule_augmented,
            elapsed_ms = elapsed_ms,
            "Generated performance prediction"
        );
    }

    pub fn log_artifacts_loaded(
        &self,
        backend: Backend,
        model: &str,
        n_features: usize,
        has_background: bool,
    ) {
        info!(
            event = "artifacts_loaded",
            service = %self.service,
            backend = %backend,
            model = %model,
            n_features = n_features,
            has_background = has_background,
            "Model artifacts loaded"
        );
    }

    pub fn log_artifacts_unavailable(&self, backend: Backend, reason: &str) {
        warn!(
            event = "artifacts_unavailable",
            service = %self.service,
            backend = %backend,
            reason = %reason,
            "Model artifacts unavailable"
        );
    }

    pub fn log_explanation_fallback(&self, backend: Backend, reason: &str) {
        info!(
            event = "explanation_fallback",
            service = %self.service,
            backend = %backend,
            reason = %reason,
            "Attribution unavailable, reporting zero contributions"
        );
    }

    pub fn log_startup(&self, version: &str, models_dir: &str) {
        info!(
            event = "server_started",
            service = %self.service,
            version = %version,
            models_dir = %models_dir,
            "Performance predictor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            service = %self.service,
            reason = %reason,
            "Performance predictor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predictor_metrics_shared_registry() {
        let metrics = PredictorMetrics::new();
        let other = PredictorMetrics::new();

        metrics.observe_prediction_latency(Backend::Tree, 0.002);
        metrics.inc_predictions(Backend::Tree, Label::Good);
        other.inc_predictions(Backend::Tree, Label::Good);
        metrics.inc_prediction_errors("inference");
        metrics.inc_explanation_fallbacks(Backend::Neural);
        metrics.inc_rule_overrides();
        metrics.set_artifacts_loaded(Backend::Tree, true);

        let families = prometheus::gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"spa_predictions_total".to_string()));
        assert!(names.contains(&"spa_artifacts_loaded".to_string()));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("performance-server");
        assert_eq!(logger.service, "performance-server");
    }
}
