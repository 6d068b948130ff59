//! Segmenter adapter: turns a stored original into a published segment set.
//!
//! The transform writes into a private staging directory next to the final
//! location. Only a complete, verified set is renamed to `segments/`, so the
//! published directory either holds a playable set or does not exist.

use crate::domain::asset::{AssetKind, StoredAsset};
use crate::domain::layout::{is_plain_file_name, LayoutKind, StorageLayout};
use crate::domain::manifest::{SegmentManifest, MANIFEST_FILE};
use crate::domain::record::FailureReason;
use crate::ports::transform::{Transform, TransformError};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("transform failed: {0}")]
    TransformFailed(String),
    #[error("i/o failure: {0}")]
    IoFailure(String),
    #[error("segmentation cancelled")]
    Cancelled,
}

impl SegmentError {
    pub fn reason(&self) -> FailureReason {
        match self {
            SegmentError::UnsupportedInput(_) => FailureReason::UnsupportedInput,
            SegmentError::TransformFailed(_) => FailureReason::TransformFailed,
            SegmentError::IoFailure(_) => FailureReason::IoFailure,
            SegmentError::Cancelled => FailureReason::Cancelled,
        }
    }
}

impl From<TransformError> for SegmentError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Unsupported(detail) => SegmentError::UnsupportedInput(detail),
            TransformError::Cancelled => SegmentError::Cancelled,
            TransformError::Io(err) => SegmentError::IoFailure(err.to_string()),
            other => SegmentError::TransformFailed(other.to_string()),
        }
    }
}

fn io_failure(context: &str, err: impl Display) -> SegmentError {
    SegmentError::IoFailure(format!("{context}: {err}"))
}

/// A verified segment set still sitting in staging.
struct Staged {
    manifest: SegmentManifest,
    manifest_size: u64,
    segments: Vec<StoredAsset>,
    relative_dir: PathBuf,
}

/// A published segment set.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub manifest: SegmentManifest,
    pub manifest_asset: StoredAsset,
    pub segments: Vec<StoredAsset>,
    pub duration_secs: f64,
    /// Size of the source that was segmented.
    pub source_size: u64,
}

pub struct Segmenter<T> {
    transform: T,
    layout: StorageLayout,
}

impl<T: Transform> Segmenter<T> {
    pub fn new(transform: T, layout: StorageLayout) -> Self {
        Self { transform, layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Segment `source` into the record's segment set.
    ///
    /// Unsupported inputs are rejected before any directory is touched. On
    /// every error path the staging directory is removed and `segments/`
    /// stays absent.
    pub async fn segment(
        &self,
        source: &Path,
        uploader_id: &str,
        record_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, SegmentError> {
        if cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }

        let probe = tokio::select! {
            probe = self.transform.probe(source) => probe?,
            _ = cancel.cancelled() => return Err(SegmentError::Cancelled),
        };
        if !probe.has_video {
            return Err(SegmentError::UnsupportedInput(format!(
                "no video stream in {} input",
                probe.format_name
            )));
        }

        let source_size = tokio::fs::metadata(source)
            .await
            .map_err(|err| io_failure("reading source", err))?
            .len();

        let target = self
            .layout
            .prepare(uploader_id, record_id, &LayoutKind::SegmentSet)
            .await
            .map_err(|err| io_failure("preparing record directory", err))?;
        if tokio::fs::try_exists(&target)
            .await
            .map_err(|err| io_failure("checking segment set", err))?
        {
            return Err(SegmentError::IoFailure(format!(
                "segment set {} already published",
                target.display()
            )));
        }
        let record_dir = target
            .parent()
            .ok_or_else(|| SegmentError::IoFailure("segment set has no record directory".into()))?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(record_dir)
            .map_err(|err| io_failure("creating staging directory", err))?;
        debug!(%record_id, staging = %staging.path().display(), "staging segment set");

        let staged = match self
            .stage(source, staging.path(), uploader_id, record_id, cancel)
            .await
        {
            Ok(staged) => staged,
            Err(err) => {
                discard(staging).await;
                return Err(err);
            }
        };
        if let Err(err) = tokio::fs::rename(staging.path(), &target).await {
            discard(staging).await;
            return Err(io_failure("publishing segment set", err));
        }
        // The staging path no longer exists; dropping the guard is a no-op.
        drop(staging);
        let Staged {
            manifest,
            manifest_size,
            segments,
            relative_dir,
        } = staged;

        let duration_secs = probe
            .duration_secs
            .unwrap_or_else(|| manifest.total_duration());

        info!(
            %record_id,
            uploader_id,
            segments = segments.len(),
            duration_secs,
            "segment set published"
        );

        Ok(Segmentation {
            manifest_asset: StoredAsset::new(
                AssetKind::Manifest,
                relative_dir.join(MANIFEST_FILE),
                manifest_size,
            ),
            manifest,
            segments,
            duration_secs,
            source_size,
        })
    }

    /// Run the transform into `staging`, verify its output and write the
    /// canonical manifest next to it.
    async fn stage(
        &self,
        source: &Path,
        staging: &Path,
        uploader_id: &str,
        record_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Staged, SegmentError> {
        let produced = tokio::select! {
            result = self.transform.segment(source, staging, cancel) => result?,
            _ = cancel.cancelled() => return Err(SegmentError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }

        let relative_dir = self
            .layout
            .relative(uploader_id, record_id, &LayoutKind::SegmentSet)
            .map_err(|err| io_failure("resolving segment set", err))?;
        let segments = verify_segments(&produced, staging, &relative_dir).await?;

        // The published manifest is always the canonical VOD rendering.
        let manifest = produced.into_vod();
        let manifest_path = staging.join(MANIFEST_FILE);
        manifest
            .write_to(&manifest_path)
            .await
            .map_err(|err| io_failure("writing manifest", err))?;
        let manifest_size = tokio::fs::metadata(&manifest_path)
            .await
            .map_err(|err| io_failure("reading manifest", err))?
            .len();

        if cancel.is_cancelled() {
            return Err(SegmentError::Cancelled);
        }
        Ok(Staged {
            manifest,
            manifest_size,
            segments,
            relative_dir,
        })
    }
}

/// Remove an unpublished staging directory on the blocking pool.
async fn discard(staging: TempDir) {
    let path = staging.path().to_path_buf();
    match tokio::task::spawn_blocking(move || staging.close()).await {
        Ok(Ok(())) => debug!(staging = %path.display(), "staging discarded"),
        Ok(Err(err)) => {
            warn!(staging = %path.display(), error = %err, "failed to remove staging directory")
        }
        Err(err) => {
            warn!(staging = %path.display(), error = %err, "staging cleanup task failed")
        }
    }
}

/// Every referenced segment, and the init segment when there is one, must be
/// a plain file name inside staging and a non-empty regular file.
async fn verify_segments(
    manifest: &SegmentManifest,
    staging: &Path,
    relative_dir: &Path,
) -> Result<Vec<StoredAsset>, SegmentError> {
    if manifest.segments.is_empty() {
        return Err(SegmentError::TransformFailed(
            "transform produced no segments".into(),
        ));
    }
    if let Some(init) = &manifest.init_segment {
        verify_file(staging, init).await?;
    }

    let mut assets = Vec::with_capacity(manifest.segments.len());
    for segment in &manifest.segments {
        let size = verify_file(staging, &segment.uri).await?;
        assets.push(StoredAsset::new(
            AssetKind::Segment,
            relative_dir.join(&segment.uri),
            size,
        ));
    }
    Ok(assets)
}

async fn verify_file(staging: &Path, uri: &str) -> Result<u64, SegmentError> {
    if !is_plain_file_name(uri) {
        return Err(SegmentError::TransformFailed(format!(
            "segment uri {uri:?} escapes the segment set"
        )));
    }
    match tokio::fs::metadata(staging.join(uri)).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(SegmentError::TransformFailed(format!(
            "segment {uri} is empty"
        ))),
        Err(err) => Err(SegmentError::TransformFailed(format!(
            "segment {uri} missing: {err}"
        ))),
    }
}
