//! Backend inference
//!
//! Scales a feature vector with the fitted scaler and runs it through the
//! backend's classifier. The neural backend either evaluates exported dense
//! weights or, with the `onnx` feature, an ONNX graph through tract.

use super::artifacts::ArtifactSet;
use super::forest::RandomForest;
use super::network::DenseNetwork;
use super::Classifier;
use crate::error::PredictError;
use crate::models::FeatureVector;
use anyhow::{ensure, Result};
use std::time::Instant;
use tracing::{debug, warn};

#[cfg(feature = "onnx")]
pub use onnx::OnnxNetwork;

/// Inference slower than this is logged as a warning
const MAX_INFERENCE_MS: u128 = 50;

/// The fitted classifier of one backend
pub enum FittedModel {
    Forest(RandomForest),
    Network(NeuralNet),
}

impl FittedModel {
    pub fn display_name(&self) -> &'static str {
        match self {
            FittedModel::Forest(_) => "Random Forest",
            FittedModel::Network(_) => "Neural Network",
        }
    }

    pub fn as_forest(&self) -> Option<&RandomForest> {
        match self {
            FittedModel::Forest(forest) => Some(forest),
            FittedModel::Network(_) => None,
        }
    }
}

impl Classifier for FittedModel {
    fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>> {
        match self {
            FittedModel::Forest(forest) => forest.predict_proba(scaled),
            FittedModel::Network(net) => net.predict_proba(scaled),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            FittedModel::Forest(forest) => Classifier::n_features(forest),
            FittedModel::Network(net) => net.n_features(),
        }
    }

    fn n_classes(&self) -> usize {
        match self {
            FittedModel::Forest(forest) => Classifier::n_classes(forest),
            FittedModel::Network(net) => net.n_classes(),
        }
    }
}

/// Neural classifier in one of its supported export formats
pub enum NeuralNet {
    Dense(DenseNetwork),
    #[cfg(feature = "onnx")]
    Onnx(OnnxNetwork),
}

impl Classifier for NeuralNet {
    fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>> {
        match self {
            NeuralNet::Dense(net) => net.predict_proba(scaled),
            #[cfg(feature = "onnx")]
            NeuralNet::Onnx(net) => net.predict_proba(scaled),
        }
    }

    fn n_features(&self) -> usize {
        match self {
            NeuralNet::Dense(net) => net.n_features(),
            #[cfg(feature = "onnx")]
            NeuralNet::Onnx(net) => net.n_features(),
        }
    }

    fn n_classes(&self) -> usize {
        match self {
            NeuralNet::Dense(net) => net.n_classes(),
            #[cfg(feature = "onnx")]
            NeuralNet::Onnx(net) => net.n_classes(),
        }
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::super::network::normalize_distribution;
    use super::super::Classifier;
    use anyhow::{Context, Result};
    use tract_onnx::prelude::*;

    type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

    /// ONNX graph with a `[1, n_features]` float input and one row of class scores
    pub struct OnnxNetwork {
        model: TractModel,
        n_features: usize,
        n_classes: usize,
    }

    impl OnnxNetwork {
        pub fn from_bytes(model_bytes: &[u8], n_features: usize, n_classes: usize) -> Result<Self> {
            let model = tract_onnx::onnx()
                .model_for_read(&mut std::io::Cursor::new(model_bytes))
                .context("Failed to parse ONNX model")?
                .with_input_fact(0, f32::fact([1, n_features]).into())
                .context("Failed to set input shape")?
                .into_optimized()
                .context("Failed to optimize model")?
                .into_runnable()
                .context("Failed to create runnable model")?;
            Ok(Self {
                model,
                n_features,
                n_classes,
            })
        }
    }

    impl Classifier for OnnxNetwork {
        fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>> {
            anyhow::ensure!(
                scaled.len() == self.n_features,
                "network expects {} features, got {}",
                self.n_features,
                scaled.len()
            );
            let input: Tensor =
                tract_ndarray::Array2::from_shape_vec((1, self.n_features), scaled.to_vec())?
                    .into();
            let result = self.model.run(tvec!(input.into()))?;
            let output = result.first().context("No output from model")?;
            let values: Vec<f32> = output.to_array_view::<f32>()?.iter().copied().collect();
            anyhow::ensure!(
                values.len() == self.n_classes,
                "Model output has {} values, expected {}",
                values.len(),
                self.n_classes
            );
            Ok(normalize_distribution(values))
        }

        fn n_features(&self) -> usize {
            self.n_features
        }

        fn n_classes(&self) -> usize {
            self.n_classes
        }
    }
}

/// Outcome of running one feature vector through a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub class_index: usize,
    pub probabilities: Vec<f32>,
    /// The standardized input the model saw, reused by the explainer
    pub scaled: Vec<f32>,
}

impl Inference {
    pub fn confidence(&self) -> f32 {
        self.probabilities[self.class_index]
    }
}

/// Scale `features` and classify them with the backend in `artifacts`
pub fn infer(artifacts: &ArtifactSet, features: &FeatureVector) -> Result<Inference, PredictError> {
    let start = Instant::now();
    let expected = artifacts.scaler().n_features();
    if features.len() != expected {
        return Err(PredictError::SchemaMismatch {
            expected,
            actual: features.len(),
        });
    }

    let scaled = artifacts.scaler().transform(features.values())?;
    let probabilities = artifacts.model().predict_proba(&scaled)?;
    check_distribution(&probabilities, artifacts.labels().len())?;
    let class_index = argmax(&probabilities);

    let elapsed = start.elapsed();
    if elapsed.as_millis() > MAX_INFERENCE_MS {
        warn!(
            backend = %artifacts.backend(),
            elapsed_ms = elapsed.as_millis(),
            "Inference exceeded {}ms target",
            MAX_INFERENCE_MS
        );
    } else {
        debug!(
            backend = %artifacts.backend(),
            elapsed_us = elapsed.as_micros(),
            "Inference completed"
        );
    }

    Ok(Inference {
        class_index,
        probabilities,
        scaled,
    })
}

fn check_distribution(probabilities: &[f32], n_labels: usize) -> Result<()> {
    ensure!(
        probabilities.len() == n_labels,
        "model produced {} class scores for {} labels",
        probabilities.len(),
        n_labels
    );
    ensure!(
        probabilities.iter().all(|p| p.is_finite() && *p >= 0.0),
        "model produced an invalid distribution: {:?}",
        probabilities
    );
    Ok(())
}

/// Index of the highest probability; ties go to the lowest index
fn argmax(probabilities: &[f32]) -> usize {
    let mut best = 0;
    for (i, p) in probabilities.iter().enumerate().skip(1) {
        if *p > probabilities[best] {
            best = i;
        }
    }
    best
}
