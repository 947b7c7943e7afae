//! Prediction output formatting
//!
//! Turns a backend's class distribution and the attribution for the winning
//! class into a `PredictionResult`, and flags predictions the model is unsure
//! about.

use super::artifacts::LabelMap;
use super::explain::Explanation;
use super::inference::Inference;
use crate::models::{FeatureContribution, FeatureVector, PredictionResult};
use anyhow::{ensure, Context, Result};

/// Confidence below which a prediction is reported as uncertain
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Confidence below which no band clearly wins
pub const SPREAD_CONFIDENCE_THRESHOLD: f32 = 0.45;

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub low_confidence_threshold: f32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Assemble the result for one prediction.
    ///
    /// Contributions follow the feature vector order and pair each feature
    /// with its raw (unscaled) value.
    pub fn format(
        &self,
        labels: &LabelMap,
        features: &FeatureVector,
        inference: &Inference,
        explanation: Explanation,
        model_used: &str,
    ) -> Result<PredictionResult> {
        let label = labels
            .get(inference.class_index)
            .with_context(|| format!("no label for class {}", inference.class_index))?;
        ensure!(
            explanation.contributions.len() == features.len(),
            "{} contributions for {} features",
            explanation.contributions.len(),
            features.len()
        );

        let contributions = features
            .iter()
            .zip(explanation.contributions)
            .map(|((feature, value), contribution)| FeatureContribution {
                feature: feature.to_string(),
                value,
                contribution,
            })
            .collect();

        Ok(PredictionResult {
            label,
            confidence: inference.confidence().clamp(0.0, 1.0),
            model_used: model_used.to_string(),
            probabilities: inference.probabilities.clone(),
            contributions,
            explanation: explanation.method,
            rule_augmented: false,
        })
    }

    pub fn is_low_confidence(&self, result: &PredictionResult) -> bool {
        result.confidence < self.config.low_confidence_threshold
    }

    pub fn low_confidence_reason(&self, result: &PredictionResult) -> Option<String> {
        if result.confidence < SPREAD_CONFIDENCE_THRESHOLD {
            Some("Model output is spread across all bands".to_string())
        } else if self.is_low_confidence(result) {
            Some("Record sits close to a band boundary".to_string())
        } else {
            None
        }
    }
}
