//! Standardization of raw feature vectors

use anyhow::{bail, ensure, Result};
use serde::Deserialize;

/// Fitted per-feature standardization, `(x - mean) / scale`
#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f32>, scale: Vec<f32>) -> Result<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let scaler: Self = serde_json::from_slice(bytes)?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.mean.is_empty(), "scaler has no features");
        ensure!(
            self.mean.len() == self.scale.len(),
            "scaler mean has {} entries but scale has {}",
            self.mean.len(),
            self.scale.len()
        );
        if self
            .mean
            .iter()
            .chain(self.scale.iter())
            .any(|v| !v.is_finite())
        {
            bail!("scaler contains non-finite values");
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, raw: &[f32]) -> Result<Vec<f32>> {
        ensure!(
            raw.len() == self.mean.len(),
            "expected {} features, got {}",
            self.mean.len(),
            raw.len()
        );
        Ok(raw
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                // constant features were fitted with zero variance
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}
