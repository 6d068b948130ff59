//! Video records and their ingestion lifecycle.

use super::asset::StoredAsset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Why an ingestion ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ThumbnailWriteFailed,
    VideoWriteFailed,
    UnsupportedInput,
    TransformFailed,
    IoFailure,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ThumbnailWriteFailed => "thumbnail_write_failed",
            FailureReason::VideoWriteFailed => "video_write_failed",
            FailureReason::UnsupportedInput => "unsupported_input",
            FailureReason::TransformFailed => "transform_failed",
            FailureReason::IoFailure => "io_failure",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle discriminant, used for filtering and transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Storing,
    Segmenting,
    Ready,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Storing => "storing",
            LifecycleState::Segmenting => "segmenting",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ingestion lifecycle of a record.
///
/// ```text
/// pending -> storing -> segmenting -> ready
///               |            |
///               +--> failed <+
/// ```
///
/// `ready` and `failed` are terminal. Pollers see `state` and, for failed
/// records, the `reason` code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Storing,
    Segmenting,
    Ready,
    Failed {
        reason: FailureReason,
        detail: String,
    },
}

impl Lifecycle {
    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        Lifecycle::Failed {
            reason,
            detail: detail.into(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self {
            Lifecycle::Pending => LifecycleState::Pending,
            Lifecycle::Storing => LifecycleState::Storing,
            Lifecycle::Segmenting => LifecycleState::Segmenting,
            Lifecycle::Ready => LifecycleState::Ready,
            Lifecycle::Failed { .. } => LifecycleState::Failed,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Lifecycle::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Ready | Lifecycle::Failed { .. })
    }

    /// Whether a cleanup process may delete a record in this state.
    pub fn is_deletable(&self) -> bool {
        matches!(self, Lifecycle::Pending | Lifecycle::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &Lifecycle) -> bool {
        use LifecycleState::*;
        matches!(
            (self.state(), next.state()),
            (Pending, Storing)
                | (Storing, Segmenting)
                | (Storing, Failed)
                | (Segmenting, Ready)
                | (Segmenting, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("record invariant violated: {0}")]
    InvariantViolated(&'static str),
}

/// Metadata for one uploaded video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: Uuid,
    pub uploader_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub lifecycle: Lifecycle,
    pub original: Option<StoredAsset>,
    pub thumbnail: Option<StoredAsset>,
    pub manifest: Option<StoredAsset>,
    #[serde(default)]
    pub segments: Vec<StoredAsset>,
    /// Seconds; only set once the record is ready.
    pub duration_secs: Option<f64>,
    pub byte_size: Option<u64>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub like_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by every applied update.
    pub version: u64,
}

impl VideoRecord {
    /// A fresh `pending` record with a newly allocated id.
    pub fn new(uploader_id: String, title: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            uploader_id,
            title,
            description,
            lifecycle: Lifecycle::Pending,
            original: None,
            thumbnail: None,
            manifest: None,
            segments: Vec::new(),
            duration_secs: None,
            byte_size: None,
            view_count: 0,
            like_count: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_playable(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    /// `duration_secs` and `manifest` are populated iff the record is ready.
    pub fn check_invariants(&self) -> Result<(), RecordError> {
        let ready = self.lifecycle == Lifecycle::Ready;
        if ready != self.duration_secs.is_some() {
            return Err(RecordError::InvariantViolated(
                "duration must be set exactly when ready",
            ));
        }
        if ready != self.manifest.is_some() {
            return Err(RecordError::InvariantViolated(
                "manifest must be set exactly when ready",
            ));
        }
        Ok(())
    }

    /// Apply a partial update. Fields left `None` are untouched. The record
    /// is left unchanged if the update is rejected.
    pub fn apply(&mut self, update: RecordUpdate) -> Result<(), RecordError> {
        let mut next = self.clone();

        if let Some(lifecycle) = update.lifecycle {
            if !self.lifecycle.can_transition_to(&lifecycle) {
                return Err(RecordError::InvalidTransition {
                    from: self.lifecycle.state(),
                    to: lifecycle.state(),
                });
            }
            next.lifecycle = lifecycle;
        }
        if update.original.is_some() {
            next.original = update.original;
        }
        if update.thumbnail.is_some() {
            next.thumbnail = update.thumbnail;
        }
        if update.manifest.is_some() {
            next.manifest = update.manifest;
        }
        if let Some(segments) = update.segments {
            next.segments = segments;
        }
        if update.duration_secs.is_some() {
            next.duration_secs = update.duration_secs;
        }
        if update.byte_size.is_some() {
            next.byte_size = update.byte_size;
        }

        next.check_invariants()?;
        next.version += 1;
        next.updated_at = Utc::now();
        *self = next;
        Ok(())
    }
}

/// Partial update of the fields the ingestion pipeline owns.
///
/// Counters and descriptive fields cannot be written through this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub lifecycle: Option<Lifecycle>,
    pub original: Option<StoredAsset>,
    pub thumbnail: Option<StoredAsset>,
    pub manifest: Option<StoredAsset>,
    pub segments: Option<Vec<StoredAsset>>,
    pub duration_secs: Option<f64>,
    pub byte_size: Option<u64>,
}

impl RecordUpdate {
    pub fn transition(lifecycle: Lifecycle) -> Self {
        Self {
            lifecycle: Some(lifecycle),
            ..Self::default()
        }
    }

    pub fn with_original(mut self, asset: StoredAsset) -> Self {
        self.original = Some(asset);
        self
    }

    pub fn with_thumbnail(mut self, asset: StoredAsset) -> Self {
        self.thumbnail = Some(asset);
        self
    }
}
