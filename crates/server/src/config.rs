//! Server configuration

use anyhow::{Context, Result};
use predictor_lib::predictor::explain::{DEFAULT_BACKGROUND_ROWS, DEFAULT_SAMPLES};
use predictor_lib::predictor::DEFAULT_MODELS_DIR;
use predictor_lib::{ExplainConfig, PredictorConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Server configuration, read from `SPA_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port for the prediction, health and metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding the trained artifacts
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    /// Load both backends at startup instead of on first request
    #[serde(default)]
    pub preload_models: bool,

    #[serde(default = "default_true")]
    pub explain_enabled: bool,

    #[serde(default = "default_explain_samples")]
    pub explain_samples: usize,

    #[serde(default = "default_explain_background_rows")]
    pub explain_background_rows: usize,

    /// Fixed seed for the sampled explainer
    #[serde(default)]
    pub explain_seed: Option<u64>,

    #[serde(default = "default_true")]
    pub rule_override: bool,
}

fn default_api_port() -> u16 {
    8000
}

fn default_models_dir() -> String {
    DEFAULT_MODELS_DIR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_explain_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_explain_background_rows() -> usize {
    DEFAULT_BACKGROUND_ROWS
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SPA").try_parsing(true))
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("Invalid server configuration")
    }

    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            models_dir: PathBuf::from(&self.models_dir),
            explain: ExplainConfig {
                enabled: self.explain_enabled,
                max_background_rows: self.explain_background_rows,
                samples: self.explain_samples,
                seed: self.explain_seed,
            },
            rule_override: self.rule_override,
        }
    }
}
