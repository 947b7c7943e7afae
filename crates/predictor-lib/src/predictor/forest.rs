//! Random forest classifier with exact TreeSHAP attribution
//!
//! Forests are exported from the training pipeline as JSON: one node list per
//! tree, each node either a `split` (go left when `x[feature] <= threshold`)
//! or a `leaf` holding per-class sample counts. `cover` is the number (or
//! weight) of training samples that reached the node, which TreeSHAP needs to
//! estimate expectations over the training distribution.

use super::Classifier;
use anyhow::{bail, ensure, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: Vec<f64>,
        cover: f64,
    },
}

impl TreeNode {
    fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

impl RandomForest {
    pub fn new(n_features: usize, n_classes: usize, trees: Vec<Vec<TreeNode>>) -> Result<Self> {
        let forest = Self {
            n_features,
            n_classes,
            trees: trees.into_iter().map(|nodes| DecisionTree { nodes }).collect(),
        };
        forest.prepared()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let forest: Self = serde_json::from_slice(bytes)?;
        forest.prepared()
    }

    /// Validate structure and turn leaf counts into class distributions
    fn prepared(mut self) -> Result<Self> {
        ensure!(self.n_features > 0, "forest declares no features");
        ensure!(self.n_classes > 0, "forest declares no classes");
        ensure!(!self.trees.is_empty(), "forest has no trees");
        for (t, tree) in self.trees.iter_mut().enumerate() {
            tree.validate(self.n_features, self.n_classes)
                .map_err(|e| e.context(format!("tree {}", t)))?;
            for node in tree.nodes.iter_mut() {
                if let TreeNode::Leaf { value, .. } = node {
                    let total: f64 = value.iter().sum();
                    value.iter_mut().for_each(|v| *v /= total);
                }
            }
        }
        Ok(self)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean class distribution over all trees
    pub fn predict_proba(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.check_width(x)?;
        let mut proba = vec![0.0f64; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.leaf_value(x)) {
                *p += v;
            }
        }
        let n = self.trees.len() as f64;
        Ok(proba.into_iter().map(|p| (p / n) as f32).collect())
    }

    /// Expected output for `class` over the training distribution
    pub fn expected_value(&self, class: usize) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.expected(0, class)).sum();
        total / self.trees.len() as f64
    }

    /// Exact SHAP values of the `class` probability at `x`.
    ///
    /// The result satisfies `sum(phi) == proba[class] - expected_value(class)`.
    pub fn tree_shap(&self, x: &[f32], class: usize) -> Result<Vec<f64>> {
        self.check_width(x)?;
        ensure!(
            class < self.n_classes,
            "class {} out of range for {} classes",
            class,
            self.n_classes
        );
        let mut phi = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.shap_recurse(x, class, &mut phi, 0, &[], 1.0, 1.0, None);
        }
        let n = self.trees.len() as f64;
        phi.iter_mut().for_each(|p| *p /= n);
        Ok(phi)
    }

    fn check_width(&self, x: &[f32]) -> Result<()> {
        ensure!(
            x.len() == self.n_features,
            "forest expects {} features, got {}",
            self.n_features,
            x.len()
        );
        Ok(())
    }
}

impl Classifier for RandomForest {
    fn predict_proba(&self, scaled: &[f32]) -> Result<Vec<f32>> {
        RandomForest::predict_proba(self, scaled)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

impl DecisionTree {
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        ensure!(!self.nodes.is_empty(), "tree has no nodes");
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            ensure!(
                cover.is_finite() && cover > 0.0,
                "node {} has invalid cover {}",
                idx,
                cover
            );
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    ensure!(*feature < n_features, "node {} splits on unknown feature {}", idx, feature);
                    ensure!(threshold.is_finite(), "node {} has a non-finite threshold", idx);
                    // children always follow their parent, which also rules out cycles
                    for child in [left, right] {
                        if *child <= idx || *child >= len {
                            bail!("node {} has invalid child index {}", idx, child);
                        }
                    }
                }
                TreeNode::Leaf { value, .. } => {
                    ensure!(
                        value.len() == n_classes,
                        "leaf {} has {} values, expected {}",
                        idx,
                        value.len(),
                        n_classes
                    );
                    ensure!(
                        value.iter().all(|v| v.is_finite() && *v >= 0.0),
                        "leaf {} has negative or non-finite values",
                        idx
                    );
                    ensure!(value.iter().sum::<f64>() > 0.0, "leaf {} is empty", idx);
                }
            }
        }
        Ok(())
    }

    fn leaf_value(&self, x: &[f32]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if f64::from(x[*feature]) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                TreeNode::Leaf { value, .. } => return value,
            }
        }
    }

    fn expected(&self, idx: usize, class: usize) -> f64 {
        match &self.nodes[idx] {
            TreeNode::Leaf { value, .. } => value[class],
            TreeNode::Split {
                left, right, cover, ..
            } => {
                let l = self.nodes[*left].cover();
                let r = self.nodes[*right].cover();
                (l * self.expected(*left, class) + r * self.expected(*right, class)) / cover
            }
        }
    }

    // Path-dependent TreeSHAP (Lundberg et al., algorithm 2). `path` tracks the
    // unique features seen from the root together with the fraction of
    // "feature absent" (zero) and "feature present" (one) flow reaching here.
    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        x: &[f32],
        class: usize,
        phi: &mut [f64],
        node: usize,
        parent_path: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent_path.to_vec();
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        match &self.nodes[node] {
            TreeNode::Leaf { value, .. } => {
                let leaf = value[class];
                for i in 1..path.len() {
                    let w = unwound_path_sum(&path, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        phi[f] += w * (el.one_fraction - el.zero_fraction) * leaf;
                    }
                }
            }
            TreeNode::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if f64::from(x[*split]) <= *threshold {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = self.nodes[hot].cover() / cover;
                let cold_zero = self.nodes[cold].cover() / cover;

                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                // undo an earlier split on the same feature so it is counted once
                if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                self.shap_recurse(
                    x,
                    class,
                    phi,
                    hot,
                    &path,
                    hot_zero * incoming_zero,
                    incoming_one,
                    Some(*split),
                );
                self.shap_recurse(
                    x,
                    class,
                    phi,
                    cold,
                    &path,
                    cold_zero * incoming_zero,
                    0.0,
                    Some(*split),
                );
            }
        }
    }
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / denom;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].pweight / zero_fraction / ((depth - i) as f64 / denom);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> TreeNode {
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            cover,
        }
    }

    fn leaf(value: &[f64], cover: f64) -> TreeNode {
        TreeNode::Leaf {
            value: value.to_vec(),
            cover,
        }
    }

    fn stump() -> RandomForest {
        RandomForest::new(
            3,
            2,
            vec![vec![
                split(0, 0.0, 1, 2, 100.0),
                leaf(&[0.0, 50.0], 50.0),
                leaf(&[50.0, 0.0], 50.0),
            ]],
        )
        .unwrap()
    }

    // Reuses feature 0 below the root so the unwind path is exercised
    fn deep_forest() -> RandomForest {
        let a = vec![
            split(0, 0.5, 1, 2, 100.0),
            split(1, -0.2, 3, 4, 60.0),
            split(0, 1.5, 5, 6, 40.0),
            leaf(&[20.0, 5.0, 5.0], 30.0),
            split(0, -1.0, 7, 8, 30.0),
            leaf(&[2.0, 8.0, 10.0], 20.0),
            leaf(&[0.0, 4.0, 16.0], 20.0),
            leaf(&[9.0, 1.0, 0.0], 10.0),
            leaf(&[4.0, 12.0, 4.0], 20.0),
        ];
        let b = vec![
            split(2, 0.0, 1, 2, 100.0),
            split(3, 0.3, 3, 4, 45.0),
            leaf(&[5.0, 15.0, 35.0], 55.0),
            leaf(&[15.0, 10.0, 0.0], 25.0),
            leaf(&[2.0, 10.0, 8.0], 20.0),
        ];
        RandomForest::new(4, 3, vec![a, b]).unwrap()
    }

    #[test]
    fn test_stump_attribution() {
        let forest = stump();
        let x = [-1.0, 3.0, 7.0];
        let proba = forest.predict_proba(&x).unwrap();
        assert_eq!(proba, vec![0.0, 1.0]);
        assert!((forest.expected_value(1) - 0.5).abs() < 1e-12);

        let phi = forest.tree_shap(&x, 1).unwrap();
        assert!((phi[0] - 0.5).abs() < 1e-12, "phi = {:?}", phi);
        assert_eq!(phi[1], 0.0);
        assert_eq!(phi[2], 0.0);
    }

    #[test]
    fn test_local_accuracy() {
        let forest = deep_forest();
        let inputs: [[f32; 4]; 4] = [
            [0.0, 0.0, 0.0, 0.0],
            [-2.0, 1.0, 1.0, -1.0],
            [1.0, -3.0, -0.5, 0.9],
            [2.0, 0.5, 0.2, 0.1],
        ];
        for x in inputs {
            let proba = forest.predict_proba(&x).unwrap();
            for class in 0..3 {
                let phi = forest.tree_shap(&x, class).unwrap();
                let total: f64 = phi.iter().sum();
                let expected = proba[class] as f64 - forest.expected_value(class);
                assert!(
                    (total - expected).abs() < 1e-6,
                    "x = {:?} class {}: sum {} != {}",
                    x,
                    class,
                    total,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let forest = deep_forest();
        let proba = forest.predict_proba(&[0.3, -0.7, 2.0, 0.0]).unwrap();
        let total: f32 = proba.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(forest.n_trees(), 2);
    }

    #[test]
    fn test_rejects_malformed_forests() {
        let backwards = r#"{"n_features": 2, "n_classes": 2, "trees": [{"nodes": [
            {"kind": "split", "feature": 0, "threshold": 0.0, "left": 0, "right": 1, "cover": 2.0},
            {"kind": "leaf", "value": [1.0, 1.0], "cover": 1.0}
        ]}]}"#;
        assert!(RandomForest::from_json(backwards.as_bytes()).is_err());

        let wrong_width = r#"{"n_features": 2, "n_classes": 3, "trees": [{"nodes": [
            {"kind": "leaf", "value": [1.0, 1.0], "cover": 1.0}
        ]}]}"#;
        assert!(RandomForest::from_json(wrong_width.as_bytes()).is_err());

        let unknown_feature = r#"{"n_features": 1, "n_classes": 2, "trees": [{"nodes": [
            {"kind": "split", "feature": 4, "threshold": 0.0, "left": 1, "right": 2, "cover": 2.0},
            {"kind": "leaf", "value": [1.0, 0.0], "cover": 1.0},
            {"kind": "leaf", "value": [0.0, 1.0], "cover": 1.0}
        ]}]}"#;
        assert!(RandomForest::from_json(unknown_feature.as_bytes()).is_err());
    }

    #[test]
    fn test_wrong_input_width() {
        let forest = stump();
        assert!(forest.predict_proba(&[1.0]).is_err());
        assert!(forest.tree_shap(&[1.0, 2.0], 0).is_err());
        assert!(forest.tree_shap(&[1.0, 2.0, 3.0], 5).is_err());
    }
}
