//! Prediction orchestration
//!
//! `PredictorService` ties the pieces together: resolve the backend, make
//! sure its artifacts are loaded, vectorize the record, classify, explain,
//! format and finally apply the rule override.

use super::artifacts::ArtifactStore;
use super::explain::{ExplainConfig, Explainer};
use super::features::vectorize_input;
use super::inference::infer;
use super::output::OutputFormatter;
use super::rules::apply_override;
use crate::error::PredictError;
use crate::models::{Backend, PredictionResult, StudentInput};
use crate::observability::{PredictorMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;

/// Default location of the trained artifacts, relative to the working directory
pub const DEFAULT_MODELS_DIR: &str = "ml/models";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub models_dir: PathBuf,
    pub explain: ExplainConfig,
    /// Lift predictions to the rule-based band when it is better
    pub rule_override: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            explain: ExplainConfig::default(),
            rule_override: true,
        }
    }
}

pub struct PredictorService {
    config: PredictorConfig,
    store: ArtifactStore,
    explainer: Explainer,
    formatter: OutputFormatter,
    metrics: PredictorMetrics,
    logger: StructuredLogger,
}

impl PredictorService {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            store: ArtifactStore::new(config.models_dir.clone()),
            explainer: Explainer::new(config.explain.clone()),
            formatter: OutputFormatter::new(),
            metrics: PredictorMetrics::new(),
            logger: StructuredLogger::new("predictor"),
            config,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn formatter(&self) -> &OutputFormatter {
        &self.formatter
    }

    /// Predict with the backend named by `selector` ("ml" or "dl")
    pub fn predict(
        &self,
        input: &StudentInput,
        selector: &str,
    ) -> Result<PredictionResult, PredictError> {
        let backend = selector.parse::<Backend>().map_err(|e| {
            self.metrics.inc_prediction_errors(e.kind());
            e
        })?;
        self.predict_with(input, backend)
    }

    pub fn predict_with(
        &self,
        input: &StudentInput,
        backend: Backend,
    ) -> Result<PredictionResult, PredictError> {
        let start = Instant::now();
        let outcome = self.run(input, backend);
        let elapsed = start.elapsed();

        match &outcome {
            Ok(result) => {
                self.metrics
                    .observe_prediction_latency(backend, elapsed.as_secs_f64());
                self.metrics.inc_predictions(backend, result.label);
                self.logger.log_prediction(
                    backend,
                    result.label,
                    result.confidence,
                    &result.model_used,
                    result.explanation,
                    result.rule_augmented,
                    elapsed.as_secs_f64() * 1000.0,
                );
            }
            Err(err) => {
                self.metrics.inc_prediction_errors(err.kind());
                warn!(backend = %backend, kind = err.kind(), error = %err, "Prediction failed");
            }
        }
        outcome
    }

    fn run(&self, input: &StudentInput, backend: Backend) -> Result<PredictionResult, PredictError> {
        let artifacts = self.store.ensure_loaded(backend)?;
        let features = vectorize_input(input);
        let inference = infer(&artifacts, &features)?;

        let explanation = self
            .explainer
            .explain(&artifacts, &inference.scaled, inference.class_index);
        if explanation.is_fallback() {
            self.metrics.inc_explanation_fallbacks(backend);
            match explanation.fallback_reason.as_deref() {
                Some(reason) if self.explainer.config().enabled => {
                    self.logger.log_explanation_fallback(backend, reason)
                }
                _ => {}
            }
        }

        let mut result = self.formatter.format(
            artifacts.labels(),
            &features,
            &inference,
            explanation,
            artifacts.model().display_name(),
        )?;

        if self.config.rule_override {
            if let StudentInput::Periods(record) = input {
                result = apply_override(record, result);
                if result.rule_augmented {
                    self.metrics.inc_rule_overrides();
                }
            }
        }
        Ok(result)
    }

    /// Load every backend up front; failures are returned, not fatal
    pub fn warm_up(&self) -> Vec<(Backend, Result<(), PredictError>)> {
        Backend::ALL
            .into_iter()
            .map(|backend| (backend, self.store.ensure_loaded(backend).map(|_| ())))
            .collect()
    }
}
