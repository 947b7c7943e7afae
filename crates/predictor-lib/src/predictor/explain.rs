//! Per-feature attribution for a single prediction
//!
//! The forest is explained exactly with TreeSHAP. The network is explained
//! with KernelSHAP against a capped background sample. Attribution is best
//! effort: any failure, including a panic inside the model, yields zero
//! contributions for every feature and the prediction itself still succeeds.

use super::artifacts::ArtifactSet;
use super::inference::FittedModel;
use super::Classifier;
use crate::models::ExplanationMethod;
use anyhow::{bail, ensure, Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Background rows used by the sampled explainer
pub const DEFAULT_BACKGROUND_ROWS: usize = 50;

/// Coalitions evaluated by the sampled explainer
pub const DEFAULT_SAMPLES: usize = 100;

const RIDGE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// When false every prediction reports zero contributions
    pub enabled: bool,
    pub max_background_rows: usize,
    pub samples: usize,
    /// Fixed seed for reproducible sampled attributions
    pub seed: Option<u64>,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_background_rows: DEFAULT_BACKGROUND_ROWS,
            samples: DEFAULT_SAMPLES,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub method: ExplanationMethod,
    /// One value per feature, in feature-vector order
    pub contributions: Vec<f32>,
    /// Why attribution fell back to zeros
    pub fallback_reason: Option<String>,
}

impl Explanation {
    pub fn zeros(n_features: usize, reason: impl Into<String>) -> Self {
        Self {
            method: ExplanationMethod::Fallback,
            contributions: vec![0.0; n_features],
            fallback_reason: Some(reason.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.method == ExplanationMethod::Fallback
    }
}

#[derive(Debug, Clone, Default)]
pub struct Explainer {
    config: ExplainConfig,
}

impl Explainer {
    pub fn new(config: ExplainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExplainConfig {
        &self.config
    }

    /// Attribute the `class_index` probability at `scaled` to each feature.
    ///
    /// Never fails; see [`Explanation::zeros`].
    pub fn explain(&self, artifacts: &ArtifactSet, scaled: &[f32], class_index: usize) -> Explanation {
        let n_features = artifacts.feature_names().len();
        if !self.config.enabled {
            return Explanation::zeros(n_features, "attribution disabled");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.attribute(artifacts, scaled, class_index)
        }));

        let explanation = match outcome {
            Ok(Ok((method, phi))) if phi.len() == n_features && phi.iter().all(|v| v.is_finite()) => {
                Explanation {
                    method,
                    contributions: phi.into_iter().map(|v| v as f32).collect(),
                    fallback_reason: None,
                }
            }
            Ok(Ok((_, phi))) => Explanation::zeros(
                n_features,
                format!("attribution produced {} invalid values", phi.len()),
            ),
            Ok(Err(e)) => Explanation::zeros(n_features, format!("{:#}", e)),
            Err(_) => Explanation::zeros(n_features, "attribution panicked"),
        };

        if let Some(reason) = &explanation.fallback_reason {
            debug!(backend = %artifacts.backend(), reason = %reason, "Attribution fell back to zeros");
        }
        explanation
    }

    fn attribute(
        &self,
        artifacts: &ArtifactSet,
        scaled: &[f32],
        class_index: usize,
    ) -> Result<(ExplanationMethod, Vec<f64>)> {
        match artifacts.model() {
            FittedModel::Forest(forest) => Ok((
                ExplanationMethod::TreeShap,
                forest.tree_shap(scaled, class_index)?,
            )),
            FittedModel::Network(net) => {
                let background = artifacts
                    .background()
                    .context("no background sample loaded")?;
                let rows = &background.rows()
                    [..background.rows().len().min(self.config.max_background_rows)];
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let model = |x: &[f32]| -> Result<f64> {
                    let proba = net.predict_proba(x)?;
                    let p = proba
                        .get(class_index)
                        .with_context(|| format!("class {} out of range", class_index))?;
                    Ok(f64::from(*p))
                };
                let phi = kernel_shap(model, scaled, rows, self.config.samples, &mut rng)?;
                Ok((ExplanationMethod::KernelShap, phi))
            }
        }
    }
}

/// Sampled Shapley values of `model` at `x` against `background`.
///
/// Coalitions are drawn in complementary pairs with sizes following the
/// Shapley kernel. The values always sum to `model(x) - mean(model(background))`.
pub fn kernel_shap<F>(
    model: F,
    x: &[f32],
    background: &[Vec<f32>],
    samples: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>>
where
    F: Fn(&[f32]) -> Result<f64>,
{
    let m = x.len();
    ensure!(m > 0, "nothing to explain");
    ensure!(!background.is_empty(), "background sample is empty");
    ensure!(
        background.iter().all(|row| row.len() == m),
        "background width does not match the input"
    );

    let fx = model(x)?;
    let mut expected = 0.0;
    for row in background {
        expected += model(row)?;
    }
    expected /= background.len() as f64;
    let delta = fx - expected;
    if m == 1 {
        return Ok(vec![delta]);
    }

    let size_weights: Vec<f64> = (1..m)
        .map(|s| (m - 1) as f64 / (s * (m - s)) as f64)
        .collect();
    let sizes = WeightedIndex::new(&size_weights)?;
    let mut masks = Vec::with_capacity(samples.max(2));
    for _ in 0..(samples / 2).max(1) {
        let size = sizes.sample(rng) + 1;
        let mut mask = vec![false; m];
        for i in rand::seq::index::sample(rng, m, size).iter() {
            mask[i] = true;
        }
        let complement: Vec<bool> = mask.iter().map(|b| !b).collect();
        masks.push(mask);
        masks.push(complement);
    }

    // Eliminate the last feature so the solution sums to delta exactly:
    // v(z) - z_last * delta = sum_j (z_j - z_last) * phi_j  for j < m - 1
    let k = m - 1;
    let mut ata = vec![vec![0.0; k]; k];
    let mut aty = vec![0.0; k];
    let mut mixed = vec![0.0f32; m];
    for mask in &masks {
        let mut value = 0.0;
        for row in background {
            for j in 0..m {
                mixed[j] = if mask[j] { x[j] } else { row[j] };
            }
            value += model(&mixed)?;
        }
        value = value / background.len() as f64 - expected;

        let last = if mask[k] { 1.0 } else { 0.0 };
        let target = value - last * delta;
        let a: Vec<f64> = (0..k)
            .map(|j| if mask[j] { 1.0 } else { 0.0 } - last)
            .collect();
        for i in 0..k {
            aty[i] += a[i] * target;
            for j in 0..k {
                ata[i][j] += a[i] * a[j];
            }
        }
    }
    for (i, row) in ata.iter_mut().enumerate() {
        row[i] += RIDGE;
    }

    let mut phi = solve(ata, aty)?;
    let rest: f64 = phi.iter().sum();
    phi.push(delta - rest);
    Ok(phi)
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            bail!("singular system at column {}", col);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Backend;
    use crate::predictor::features::vectorize;
    use crate::predictor::fixtures;
    use crate::predictor::inference::infer;

    fn seeded(seed: u64) -> Explainer {
        Explainer::new(ExplainConfig {
            seed: Some(seed),
            ..ExplainConfig::default()
        })
    }

    #[test]
    fn test_solve() {
        let x = solve(
            vec![vec![2.0, 1.0], vec![1.0, 3.0]],
            vec![5.0, 10.0],
        )
        .unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_kernel_shap_recovers_linear_model() {
        let weights = [2.0, -1.0, 0.5, 3.0];
        let model = |x: &[f32]| -> Result<f64> {
            Ok(x.iter().zip(weights).map(|(v, w)| f64::from(*v) * w).sum())
        };
        let background = vec![
            vec![0.0, 1.0, 2.0, -1.0],
            vec![1.0, -1.0, 0.0, 1.0],
            vec![-1.0, 0.0, 1.0, 0.0],
        ];
        let means = [0.0, 0.0, 1.0, 0.0];
        let x = [1.5f32, 2.0, -1.0, 0.5];

        let mut rng = StdRng::seed_from_u64(7);
        let phi = kernel_shap(model, &x, &background, 100, &mut rng).unwrap();
        for j in 0..4 {
            let exact = weights[j] * (f64::from(x[j]) - means[j]);
            assert!((phi[j] - exact).abs() < 1e-4, "phi[{}] = {} != {}", j, phi[j], exact);
        }
    }

    #[test]
    fn test_single_feature() {
        let model = |x: &[f32]| -> Result<f64> { Ok(f64::from(x[0]) * 2.0) };
        let mut rng = StdRng::seed_from_u64(1);
        let phi = kernel_shap(model, &[3.0], &[vec![1.0]], 100, &mut rng).unwrap();
        assert_eq!(phi, vec![4.0]);
    }

    #[test]
    fn test_forest_uses_tree_shap() {
        let artifacts = fixtures::artifact_set(Backend::Tree);
        let features = vectorize(&fixtures::strong_student());
        let inference = infer(&artifacts, &features).unwrap();
        let explanation = Explainer::default().explain(&artifacts, &inference.scaled, inference.class_index);

        assert_eq!(explanation.method, ExplanationMethod::TreeShap);
        assert_eq!(explanation.contributions.len(), 25);
        let forest = artifacts.model().as_forest().unwrap();
        let total: f32 = explanation.contributions.iter().sum();
        let expected = inference.confidence() - forest.expected_value(inference.class_index) as f32;
        assert!((total - expected).abs() < 1e-4);
        // features the trees never split on get nothing
        assert_eq!(explanation.contributions[0], 0.0);
        assert!(explanation.contributions[1] > 0.0);
    }

    #[test]
    fn test_network_uses_kernel_shap() {
        let artifacts = fixtures::artifact_set(Backend::Neural);
        let features = vectorize(&fixtures::strong_student());
        let inference = infer(&artifacts, &features).unwrap();

        let first = seeded(42).explain(&artifacts, &inference.scaled, inference.class_index);
        let second = seeded(42).explain(&artifacts, &inference.scaled, inference.class_index);
        assert_eq!(first.method, ExplanationMethod::KernelShap);
        assert_eq!(first, second);

        let background = artifacts.background().unwrap().rows();
        let mut baseline = 0.0;
        for row in background {
            baseline += artifacts.model().predict_proba(row).unwrap()[inference.class_index];
        }
        baseline /= background.len() as f32;
        let total: f32 = first.contributions.iter().sum();
        assert!((total - (inference.confidence() - baseline)).abs() < 1e-3);
    }

    #[test]
    fn test_disabled_explainer_reports_zeros() {
        let artifacts = fixtures::artifact_set(Backend::Tree);
        let explainer = Explainer::new(ExplainConfig {
            enabled: false,
            ..ExplainConfig::default()
        });
        let explanation = explainer.explain(&artifacts, &[0.0; 25], 0);
        assert!(explanation.is_fallback());
        assert_eq!(explanation.contributions, vec![0.0; 25]);
    }

    #[test]
    fn test_bad_input_falls_back() {
        let artifacts = fixtures::artifact_set(Backend::Tree);
        let explanation = Explainer::default().explain(&artifacts, &[0.0; 3], 0);
        assert!(explanation.is_fallback());
        assert_eq!(explanation.contributions.len(), 25);
        assert!(explanation.fallback_reason.is_some());
    }

    #[test]
    fn test_missing_background_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        fixtures::write_models_dir(dir.path());
        std::fs::remove_file(dir.path().join(crate::predictor::artifacts::BACKGROUND_FILE)).unwrap();
        let artifacts = crate::predictor::artifacts::load_artifacts(dir.path(), Backend::Neural).unwrap();

        let explanation = seeded(3).explain(&artifacts, &[0.0; 25], 1);
        assert!(explanation.is_fallback());
        assert_eq!(explanation.contributions, vec![0.0; 25]);
    }

    fn neural_with_background(rows: &[Vec<f32>]) -> ArtifactSet {
        let dir = tempfile::TempDir::new().unwrap();
        fixtures::write_models_dir(dir.path());
        fixtures::write_json(
            dir.path(),
            crate::predictor::artifacts::BACKGROUND_FILE,
            &serde_json::json!(rows),
        );
        crate::predictor::artifacts::load_artifacts(dir.path(), Backend::Neural).unwrap()
    }

    #[test]
    fn test_background_rows_beyond_cap_are_ignored() {
        let leading: Vec<Vec<f32>> = (0..DEFAULT_BACKGROUND_ROWS)
            .map(|k| vec![-1.5 + 0.06 * k as f32; 25])
            .collect();
        let mut oversized = leading.clone();
        oversized.extend((0..70).map(|_| vec![9.0; 25]));

        let capped = neural_with_background(&leading);
        let full = neural_with_background(&oversized);
        assert_eq!(full.background().unwrap().rows().len(), 120);

        let x = [0.8f32; 25];
        let expected = seeded(21).explain(&capped, &x, 2);
        let actual = seeded(21).explain(&full, &x, 2);
        assert_eq!(actual.method, ExplanationMethod::KernelShap);
        assert_eq!(actual.contributions, expected.contributions);
    }

    #[test]
    fn test_kernel_shap_evaluation_budget() {
        let calls = std::cell::Cell::new(0usize);
        let model = |x: &[f32]| -> Result<f64> {
            calls.set(calls.get() + 1);
            Ok(x.iter().map(|v| f64::from(*v)).sum())
        };
        let background: Vec<Vec<f32>> = (0..DEFAULT_BACKGROUND_ROWS)
            .map(|k| vec![k as f32 / 10.0; 4])
            .collect();
        let mut rng = StdRng::seed_from_u64(9);

        kernel_shap(model, &[1.0; 4], &background, DEFAULT_SAMPLES, &mut rng).unwrap();
        let rows = DEFAULT_BACKGROUND_ROWS;
        assert_eq!(calls.get(), 1 + rows + DEFAULT_SAMPLES * rows);
    }
}
