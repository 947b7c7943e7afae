//! Performance prediction engine

pub mod artifacts;
pub mod explain;
pub mod features;
pub mod forest;
pub mod inference;
pub mod network;
pub mod output;
pub mod rules;
pub mod scaler;
mod service;

#[cfg(test)]
mod fixtures;

pub use artifacts::{ArtifactSet, ArtifactStore, Background, LabelMap, LoadState};
pub use explain::{ExplainConfig, Explainer, Explanation};
pub use features::{
    vectorize, vectorize_input, vectorize_legacy, FeatureSchema, LEGACY_FEATURE_COUNT,
    PERIOD_FEATURE_COUNT,
};
pub use forest::RandomForest;
pub use inference::{infer, FittedModel, Inference, NeuralNet};
pub use network::DenseNetwork;
pub use output::{OutputConfig, OutputFormatter, LOW_CONFIDENCE_THRESHOLD};
pub use rules::{apply_override, rule_score, RuleScore};
pub use scaler::StandardScaler;
pub use service::{PredictorConfig, PredictorService, DEFAULT_MODELS_DIR};

use anyhow::Result;

/// A fitted classifier over standardized features
pub trait Classifier: Send + Sync {
    /// Class distribution for one standardized feature vector
    fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>>;

    fn n_features(&self) -> usize;

    fn n_classes(&self) -> usize;
}
