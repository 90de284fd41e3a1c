use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Suspension point of a capture, used to report where a timeout or
/// cancellation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Navigate,
    Evaluate,
    Capture,
    Write,
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Launch => "launch",
            Stage::Navigate => "navigate",
            Stage::Evaluate => "evaluate",
            Stage::Capture => "capture",
            Stage::Write => "write",
            Stage::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element not found: {0}")]
    SelectorNotFound(String),

    #[error("Page evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Invalid clip rectangle: {0}")]
    InvalidClip(String),

    #[error("Invalid root directory: {0}")]
    InvalidRoot(String),

    #[error("Static server bind failed: {0}")]
    ServerBindFailed(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Failed to write {}: {reason}", path.display())]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error("Timeout after {limit:?} during {stage}")]
    Timeout { stage: Stage, limit: Duration },

    #[error("Cancelled during {0}")]
    Cancelled(Stage),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CaptureError {
    /// Stage reported by timeout and cancellation errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CaptureError::Timeout { stage, .. } | CaptureError::Cancelled(stage) => Some(*stage),
            CaptureError::LaunchFailed(_) => Some(Stage::Launch),
            CaptureError::NavigationFailed(_) => Some(Stage::Navigate),
            CaptureError::EvaluationFailed(_) | CaptureError::SelectorNotFound(_) => {
                Some(Stage::Evaluate)
            }
            CaptureError::CaptureFailed(_) => Some(Stage::Capture),
            CaptureError::WriteFailed { .. } => Some(Stage::Write),
            CaptureError::TeardownFailed(_) => Some(Stage::Teardown),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CaptureError::Timeout { .. })
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_reporting() {
        let err = CaptureError::Timeout {
            stage: Stage::Navigate,
            limit: Duration::from_secs(3),
        };
        assert!(err.is_timeout());
        assert_eq!(err.stage(), Some(Stage::Navigate));
        assert_eq!(err.to_string(), "Timeout after 3s during navigate");

        assert_eq!(
            CaptureError::SelectorNotFound("#box".into()).stage(),
            Some(Stage::Evaluate)
        );
        assert_eq!(
            CaptureError::TeardownFailed("page close".into()).stage(),
            Some(Stage::Teardown)
        );
        assert_eq!(CaptureError::InvalidRoot("x".into()).stage(), None);
    }

    #[test]
    fn test_write_failed_display() {
        let err = CaptureError::WriteFailed {
            path: PathBuf::from("/tmp/out.png"),
            reason: "permission denied".into(),
        };
        assert_eq!(err.to_string(), "Failed to write /tmp/out.png: permission denied");
    }
}
