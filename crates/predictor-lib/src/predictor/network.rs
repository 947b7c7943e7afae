//! Feed-forward network evaluated from exported dense weights
//!
//! `dl_model.json` holds the layers of a small fully connected classifier in
//! the layout Keras reports them: `weights[in][out]`, `bias[out]` and the
//! layer's activation.

use super::Classifier;
use anyhow::{ensure, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Linear,
    Softmax,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

impl DenseLayer {
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>, activation: Activation) -> Self {
        Self {
            weights,
            bias,
            activation,
        }
    }

    fn inputs(&self) -> usize {
        self.weights.len()
    }

    fn outputs(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = self.bias.clone();
        for (x, row) in input.iter().zip(&self.weights) {
            for (o, w) in out.iter_mut().zip(row) {
                *o += x * w;
            }
        }
        match self.activation {
            Activation::Relu => out.iter_mut().for_each(|v| *v = v.max(0.0)),
            Activation::Linear => {}
            Activation::Softmax => softmax(&mut out),
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self> {
        let network = Self { layers };
        network.validate()?;
        Ok(network)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let network: Self = serde_json::from_slice(bytes)?;
        network.validate()?;
        Ok(network)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.layers.is_empty(), "network has no layers");
        let mut width = self.layers[0].inputs();
        ensure!(width > 0, "first layer has no inputs");
        for (i, layer) in self.layers.iter().enumerate() {
            ensure!(
                layer.inputs() == width,
                "layer {} expects {} inputs but receives {}",
                i,
                layer.inputs(),
                width
            );
            ensure!(layer.outputs() > 0, "layer {} has no outputs", i);
            for row in &layer.weights {
                ensure!(
                    row.len() == layer.outputs(),
                    "layer {} weight row has {} columns, expected {}",
                    i,
                    row.len(),
                    layer.outputs()
                );
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.bias)
                .all(|v| v.is_finite());
            ensure!(finite, "layer {} has non-finite parameters", i);
            width = layer.outputs();
        }
        Ok(())
    }

    /// Raw output of the last layer
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        ensure!(
            input.len() == self.n_features(),
            "network expects {} features, got {}",
            self.n_features(),
            input.len()
        );
        let mut activations = input.to_vec();
        for layer in &self.layers {
            activations = layer.forward(&activations);
        }
        Ok(activations)
    }
}

impl Classifier for DenseNetwork {
    fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>> {
        Ok(normalize_distribution(self.forward(scaled)?))
    }

    fn n_features(&self) -> usize {
        self.layers[0].inputs()
    }

    fn n_classes(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut total = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        total += *v;
    }
    values.iter_mut().for_each(|v| *v /= total);
}

/// Turn raw network output into a class distribution.
///
/// Output that already looks like probabilities is only renormalized,
/// anything else (logits from a graph without a final softmax) goes through
/// softmax.
pub fn normalize_distribution(mut raw: Vec<f32>) -> Vec<f32> {
    let total: f32 = raw.iter().sum();
    let is_distribution =
        raw.iter().all(|v| v.is_finite() && *v >= 0.0) && (total - 1.0).abs() <= 1e-3;
    if is_distribution {
        raw.iter_mut().for_each(|v| *v /= total);
    } else {
        softmax(&mut raw);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layer() -> DenseNetwork {
        DenseNetwork::new(vec![
            DenseLayer::new(
                vec![vec![1.0, -1.0], vec![0.5, 0.5]],
                vec![0.0, 0.1],
                Activation::Relu,
            ),
            DenseLayer::new(
                vec![vec![2.0, 0.0, -1.0], vec![0.0, 1.0, 1.0]],
                vec![0.0, 0.0, 0.0],
                Activation::Softmax,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_forward_pass() {
        let net = two_layer();
        assert_eq!(net.n_features(), 2);
        assert_eq!(net.n_classes(), 3);

        // hidden = relu([1*1 + 2*0.5, -1 + 2*0.5 + 0.1]) = [2.0, 0.1]
        let proba = net.predict_proba(&[1.0, 2.0]).unwrap();
        let logits = [4.0f32, 0.1, -1.9];
        let denom: f32 = logits.iter().map(|l| l.exp()).sum();
        for (p, l) in proba.iter().zip(logits) {
            assert!((p - l.exp() / denom).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_mismatched_layers() {
        let result = DenseNetwork::new(vec![
            DenseLayer::new(vec![vec![1.0, 1.0]], vec![0.0, 0.0], Activation::Relu),
            DenseLayer::new(vec![vec![1.0]], vec![0.0], Activation::Softmax),
        ]);
        assert!(result.is_err());

        let json = r#"{"layers": [{"weights": [[1.0, 2.0]], "bias": [0.0], "activation": "relu"}]}"#;
        assert!(DenseNetwork::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_wrong_input_width() {
        assert!(two_layer().predict_proba(&[1.0]).is_err());
    }

    #[test]
    fn test_normalize_distribution() {
        let already = normalize_distribution(vec![0.2, 0.3, 0.5]);
        assert!((already[2] - 0.5).abs() < 1e-6);

        let logits = normalize_distribution(vec![2.0, -1.0, 0.5]);
        let total: f32 = logits.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(logits.iter().all(|p| *p > 0.0));
        assert!(logits[0] > logits[2] && logits[2] > logits[1]);
    }
}
