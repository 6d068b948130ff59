use crate::domain::manifest::SegmentManifest;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// What an inspection of the source container found.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub format_name: String,
    pub duration_secs: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Debug, Error)]
pub enum TransformError {
    /// The input could not be inspected as a media container.
    #[error("unsupported input: {0}")]
    Unsupported(String),
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Exited {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("{tool} timed out after {after:?}")]
    TimedOut { tool: String, after: Duration },
    #[error("transform produced invalid output: {0}")]
    InvalidOutput(String),
    #[error("transform cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The external capability that turns a video into a segmented stream.
///
/// `segment` writes a manifest and its segments into `staging` only; making
/// them visible is the caller's business. Implementations must stop promptly
/// once `cancel` fires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transform: Send + Sync {
    async fn probe(&self, source: &Path) -> Result<MediaProbe, TransformError>;

    async fn segment(
        &self,
        source: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<SegmentManifest, TransformError>;
}
