//! Ingestion orchestrator: drives one upload from `pending` to a terminal
//! state.

use super::segmenter::{SegmentError, Segmenter};
use crate::adapters::local::fs::BlobWriter;
use crate::domain::asset::{AssetKind, StoredAsset};
use crate::domain::layout::{LayoutKind, StorageLayout};
use crate::domain::record::{FailureReason, Lifecycle, RecordUpdate, VideoRecord};
use crate::domain::upload::UploadPart;
use crate::ports::repository::{RecordStore, StoreError};
use crate::ports::transform::Transform;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Attempts per lifecycle transition before a version conflict or an
/// unavailable store is reported.
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Pause before retrying against an unavailable store, scaled by attempt.
const UNAVAILABLE_BACKOFF: Duration = Duration::from_millis(20);

/// An accepted upload: descriptive fields plus the two file streams.
#[derive(Debug)]
pub struct IngestRequest {
    pub uploader_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail: UploadPart,
    pub video: UploadPart,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("thumbnail write failed: {0}")]
    ThumbnailWriteFailed(String),
    #[error("video write failed: {0}")]
    VideoWriteFailed(String),
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("transform failed: {0}")]
    TransformFailed(String),
    #[error("i/o failure: {0}")]
    IoFailure(String),
    #[error("ingestion cancelled")]
    Cancelled,
    #[error("record store unavailable: {0}")]
    RecordStoreUnavailable(String),
    #[error("record update rejected: {0}")]
    RecordConflict(String),
}

impl IngestionError {
    /// The reason recorded on the record when this error ends an ingestion.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            IngestionError::ThumbnailWriteFailed(_) => Some(FailureReason::ThumbnailWriteFailed),
            IngestionError::VideoWriteFailed(_) => Some(FailureReason::VideoWriteFailed),
            IngestionError::UnsupportedInput(_) => Some(FailureReason::UnsupportedInput),
            IngestionError::TransformFailed(_) => Some(FailureReason::TransformFailed),
            IngestionError::IoFailure(_) => Some(FailureReason::IoFailure),
            IngestionError::Cancelled => Some(FailureReason::Cancelled),
            IngestionError::InvalidRequest(_)
            | IngestionError::RecordStoreUnavailable(_)
            | IngestionError::RecordConflict(_) => None,
        }
    }

    /// Whether the caller sent something that can never succeed as is.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestionError::InvalidRequest(_) | IngestionError::UnsupportedInput(_)
        )
    }
}

impl From<SegmentError> for IngestionError {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::UnsupportedInput(detail) => IngestionError::UnsupportedInput(detail),
            SegmentError::TransformFailed(detail) => IngestionError::TransformFailed(detail),
            SegmentError::IoFailure(detail) => IngestionError::IoFailure(detail),
            SegmentError::Cancelled => IngestionError::Cancelled,
        }
    }
}

fn store_error(err: StoreError) -> IngestionError {
    match err {
        StoreError::Unavailable(detail) => IngestionError::RecordStoreUnavailable(detail),
        other => IngestionError::RecordConflict(other.to_string()),
    }
}

pub struct Orchestrator<S, T> {
    store: S,
    segmenter: Segmenter<T>,
    writer: BlobWriter,
}

impl<S, T> Orchestrator<S, T>
where
    S: RecordStore,
    T: Transform,
{
    pub fn new(store: S, segmenter: Segmenter<T>) -> Self {
        Self {
            store,
            segmenter,
            writer: BlobWriter::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> &StorageLayout {
        self.segmenter.layout()
    }

    /// Accept and process an upload in one call.
    pub async fn ingest(
        &self,
        request: IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<VideoRecord, IngestionError> {
        let record = self
            .accept(request.uploader_id, request.title, request.description)
            .await?;
        self.process(record, request.thumbnail, request.video, cancel)
            .await
    }

    /// Validate the request and persist a fresh `pending` record. Nothing is
    /// written to storage.
    pub async fn accept(
        &self,
        uploader_id: String,
        title: String,
        description: Option<String>,
    ) -> Result<VideoRecord, IngestionError> {
        self.layout()
            .validate_uploader(&uploader_id)
            .map_err(|err| IngestionError::InvalidRequest(err.to_string()))?;
        if title.trim().is_empty() {
            return Err(IngestionError::InvalidRequest("title must not be empty".into()));
        }
        let description = description.filter(|d| !d.trim().is_empty());

        let record = VideoRecord::new(uploader_id, title, description);
        self.store.create(record.clone()).await.map_err(|err| {
            error!(error = %err, "failed to create record");
            IngestionError::RecordStoreUnavailable(err.to_string())
        })?;

        info!(record_id = %record.id, uploader_id = %record.uploader_id, "upload accepted");
        Ok(record)
    }

    /// Store both files, segment the original and publish the result.
    ///
    /// Failures after `storing` are recorded on the record and returned.
    /// Assets written before a failure are kept.
    pub async fn process(
        &self,
        record: VideoRecord,
        thumbnail: UploadPart,
        video: UploadPart,
        cancel: &CancellationToken,
    ) -> Result<VideoRecord, IngestionError> {
        let id = record.id;
        let uploader = record.uploader_id.as_str();
        let layout = self.layout();

        self.transition(id, RecordUpdate::transition(Lifecycle::Storing))
            .await?;
        if cancel.is_cancelled() {
            return Err(self.fail(id, RecordUpdate::default(), IngestionError::Cancelled).await);
        }

        let thumbnail_kind = LayoutKind::thumbnail(thumbnail.file_name.as_deref());
        let thumbnail_asset = match self
            .store_part(uploader, id, &thumbnail_kind, thumbnail, cancel)
            .await
        {
            Ok(asset) => asset,
            Err(StoreFailure::Cancelled) => {
                return Err(self.fail(id, RecordUpdate::default(), IngestionError::Cancelled).await)
            }
            Err(StoreFailure::Write(detail)) => {
                let err = IngestionError::ThumbnailWriteFailed(detail);
                return Err(self.fail(id, RecordUpdate::default(), err).await);
            }
        };
        let kept = RecordUpdate::default().with_thumbnail(thumbnail_asset.clone());

        let original_kind = LayoutKind::original(video.file_name.as_deref());
        let original_asset = match self
            .store_part(uploader, id, &original_kind, video, cancel)
            .await
        {
            Ok(asset) => asset,
            Err(StoreFailure::Cancelled) => {
                return Err(self.fail(id, kept, IngestionError::Cancelled).await)
            }
            Err(StoreFailure::Write(detail)) => {
                let err = IngestionError::VideoWriteFailed(detail);
                return Err(self.fail(id, kept, err).await);
            }
        };

        let segmenting = RecordUpdate::transition(Lifecycle::Segmenting)
            .with_thumbnail(thumbnail_asset)
            .with_original(original_asset.clone());
        if let Err(err) = self.transition(id, segmenting).await {
            let kept = kept.with_original(original_asset);
            return Err(self.fail(id, kept, err).await);
        }

        let source = layout.root().join(&original_asset.path);
        let segmentation = match self.segmenter.segment(&source, uploader, id, cancel).await {
            Ok(segmentation) => segmentation,
            Err(err) => return Err(self.fail(id, RecordUpdate::default(), err.into()).await),
        };

        let ready_update = RecordUpdate {
            lifecycle: Some(Lifecycle::Ready),
            manifest: Some(segmentation.manifest_asset),
            segments: Some(segmentation.segments),
            duration_secs: Some(segmentation.duration_secs),
            byte_size: Some(segmentation.source_size),
            ..RecordUpdate::default()
        };
        let ready = match self.transition(id, ready_update).await {
            Ok(ready) => ready,
            Err(err) => {
                // A failed record never keeps a published segment set.
                self.unpublish(uploader, id).await;
                return Err(self.fail(id, RecordUpdate::default(), err).await);
            }
        };

        info!(
            record_id = %id,
            duration_secs = segmentation.duration_secs,
            segments = ready.segments.len(),
            "record ready"
        );
        Ok(ready)
    }

    /// Resolve, prepare and write one uploaded file.
    async fn store_part(
        &self,
        uploader_id: &str,
        id: Uuid,
        kind: &LayoutKind,
        part: UploadPart,
        cancel: &CancellationToken,
    ) -> Result<StoredAsset, StoreFailure> {
        let asset_kind = match kind {
            LayoutKind::Thumbnail { .. } => AssetKind::Thumbnail,
            _ => AssetKind::Original,
        };
        let dest = self
            .layout()
            .prepare(uploader_id, id, kind)
            .await
            .map_err(|err| StoreFailure::Write(err.to_string()))?;

        // Dropping the write on cancel removes its temp file.
        let written = tokio::select! {
            result = self.writer.write(part.body, &dest) => {
                result.map_err(|err| StoreFailure::Write(err.to_string()))?
            }
            _ = cancel.cancelled() => return Err(StoreFailure::Cancelled),
        };

        Ok(StoredAsset::new(
            asset_kind,
            self.layout().to_relative(&written.path),
            written.size,
        )
        .with_checksum(written.sha256))
    }

    /// End an accepted record that will never be processed as
    /// `failed(cancelled)`, passing through `storing`.
    pub async fn abandon(&self, id: Uuid) -> IngestionError {
        if let Err(err) = self
            .transition(id, RecordUpdate::transition(Lifecycle::Storing))
            .await
        {
            error!(record_id = %id, error = %err, "failed to abandon record");
            return err;
        }
        self.fail(id, RecordUpdate::default(), IngestionError::Cancelled)
            .await
    }

    /// Read-modify-write against the current version. Version conflicts and
    /// an unavailable store are retried up to [`MAX_UPDATE_ATTEMPTS`] times.
    async fn transition(&self, id: Uuid, update: RecordUpdate) -> Result<VideoRecord, IngestionError> {
        let mut attempt = 1;
        loop {
            match self.try_transition(id, &update).await {
                Ok(record) => return Ok(record),
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_UPDATE_ATTEMPTS => {
                    debug!(record_id = %id, attempt, "version conflict, retrying");
                }
                Err(StoreError::Unavailable(detail)) if attempt < MAX_UPDATE_ATTEMPTS => {
                    warn!(record_id = %id, attempt, %detail, "record store unavailable, retrying");
                    tokio::time::sleep(UNAVAILABLE_BACKOFF * attempt as u32).await;
                }
                Err(err) => return Err(store_error(err)),
            }
            attempt += 1;
        }
    }

    async fn try_transition(&self, id: Uuid, update: &RecordUpdate) -> Result<VideoRecord, StoreError> {
        let current = self.store.get(id).await?.ok_or(StoreError::NotFound(id))?;
        self.store
            .update(id, Some(current.version), update.clone())
            .await
    }

    /// Remove a published segment set that could not be recorded.
    async fn unpublish(&self, uploader_id: &str, id: Uuid) {
        let Ok(segments) = self.layout().resolve(uploader_id, id, &LayoutKind::SegmentSet) else {
            return;
        };
        if let Err(err) = tokio::fs::remove_dir_all(&segments).await {
            error!(record_id = %id, path = %segments.display(), error = %err, "failed to remove segment set");
        }
    }

    /// Record `err` as the terminal state and hand it back. Store errors are
    /// recorded as `io_failure`. A store failure while recording is logged;
    /// the original error still wins.
    async fn fail(&self, id: Uuid, mut update: RecordUpdate, err: IngestionError) -> IngestionError {
        let reason = err.failure_reason().unwrap_or(FailureReason::IoFailure);
        update.lifecycle = Some(Lifecycle::failed(reason, err.to_string()));
        if let Err(store_err) = self.transition(id, update).await {
            error!(record_id = %id, error = %store_err, "failed to record ingestion failure");
        }
        warn!(record_id = %id, %reason, error = %err, "ingestion failed");
        err
    }
}

enum StoreFailure {
    Write(String),
    Cancelled,
}
