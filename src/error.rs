//! Error taxonomy for the fusion core.
//!
//! Provider, config and binary boundaries use `anyhow`; everything that the
//! session loop has to classify (retry, default-fill, terminate) is a
//! `ProctorError`.

use std::fmt;

use thiserror::Error;

/// Result type for core operations.
pub type ProctorResult<T> = Result<T, ProctorError>;

/// Sub-analysis that produced a per-frame failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnalysisStage {
    Landmarks,
    Geometry,
    Pose,
    Objects,
}

impl AnalysisStage {
    pub const ALL: [AnalysisStage; 4] = [
        AnalysisStage::Landmarks,
        AnalysisStage::Geometry,
        AnalysisStage::Pose,
        AnalysisStage::Objects,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStage::Landmarks => "landmarks",
            AnalysisStage::Geometry => "geometry",
            AnalysisStage::Pose => "pose",
            AnalysisStage::Objects => "objects",
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the fusion core.
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Bad or corrupt frame bytes. The frame gets the conservative record.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// A detector could not be initialized. The service is not ready.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Failure inside one sub-analysis for one frame.
    #[error("{stage} analysis failed: {message}")]
    Analysis {
        stage: AnalysisStage,
        message: String,
    },

    /// The consumer of fused records went away.
    #[error("transport closed: {0}")]
    Transport(String),

    /// The frame source failed in a way that cannot be skipped.
    #[error("frame source failed: {0}")]
    Source(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProctorError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn analysis(stage: AnalysisStage, message: impl Into<String>) -> Self {
        Self::Analysis {
            stage,
            message: message.into(),
        }
    }

    /// Wrap a provider error as a per-frame analysis failure.
    pub fn from_provider(stage: AnalysisStage, err: anyhow::Error) -> Self {
        Self::Analysis {
            stage,
            message: format!("{:#}", err),
        }
    }

    /// Stage of a per-frame analysis failure, if this is one.
    pub fn stage(&self) -> Option<AnalysisStage> {
        match self {
            Self::Analysis { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Errors that only invalidate the current frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Analysis { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_become_stage_failures() {
        let err = ProctorError::from_provider(
            AnalysisStage::Objects,
            anyhow::anyhow!("model returned no tensor"),
        );
        assert_eq!(err.stage(), Some(AnalysisStage::Objects));
        assert!(err.is_frame_local());
        assert_eq!(
            err.to_string(),
            "objects analysis failed: model returned no tensor"
        );
    }

    #[test]
    fn transport_and_source_errors_are_not_frame_local() {
        assert!(!ProctorError::Transport("closed".into()).is_frame_local());
        assert!(!ProctorError::Source("eof".into()).is_frame_local());
        assert!(ProctorError::decode("short buffer").is_frame_local());
    }
}
