//! Typed failures surfaced by the prediction core

use crate::models::Backend;
use thiserror::Error;

/// Failures returned by [`crate::predictor::PredictorService`].
///
/// `ArtifactsUnavailable` and `UnsupportedBackend` are caller-correctable and
/// are meant to be translated into a user-facing response. Everything else is
/// an internal failure that should be reported generically.
#[derive(Debug, Error)]
pub enum PredictError {
    /// Required artifacts (or the runtime needed to read them) are missing or unreadable
    #[error("{backend} artifacts unavailable: {reason}")]
    ArtifactsUnavailable { backend: Backend, reason: String },

    /// Backend selector was neither "ml" nor "dl"
    #[error("Unsupported model_type: {0}")]
    UnsupportedBackend(String),

    /// Input vector does not match the feature schema the model was trained on
    #[error("feature vector has {actual} values but the model expects {expected}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Unexpected failure while scaling or running the model
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

impl PredictError {
    pub fn artifacts_unavailable(backend: Backend, reason: impl Into<String>) -> Self {
        Self::ArtifactsUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// True for failures the caller can fix without a server-side change
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictError::ArtifactsUnavailable { .. } | PredictError::UnsupportedBackend(_)
        )
    }

    /// Short machine-readable kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::ArtifactsUnavailable { .. } => "artifacts_unavailable",
            PredictError::UnsupportedBackend(_) => "unsupported_backend",
            PredictError::SchemaMismatch { .. } => "schema_mismatch",
            PredictError::Inference(_) => "inference",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(PredictError::artifacts_unavailable(Backend::Tree, "missing").is_client_error());
        assert!(PredictError::UnsupportedBackend("xx".into()).is_client_error());
        assert!(!PredictError::SchemaMismatch { expected: 25, actual: 4 }.is_client_error());
        assert!(!PredictError::Inference(anyhow::anyhow!("boom")).is_client_error());
    }

    #[test]
    fn test_messages_name_the_backend() {
        let err = PredictError::artifacts_unavailable(Backend::Neural, "dl_model.json missing");
        assert_eq!(err.to_string(), "dl artifacts unavailable: dl_model.json missing");
        assert_eq!(err.kind(), "artifacts_unavailable");
    }
}
