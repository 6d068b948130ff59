use crate::domain::record::{LifecycleState, RecordError, RecordUpdate, VideoRecord};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("record {0} already exists")]
    AlreadyExists(Uuid),
    #[error("version conflict on record {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },
    #[error(transparent)]
    Rejected(#[from] RecordError),
}

/// Selection for [`RecordStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub uploader_id: Option<String>,
    pub state: Option<LifecycleState>,
}

impl RecordFilter {
    /// Records that can be played back.
    pub fn playable() -> Self {
        Self {
            uploader_id: None,
            state: Some(LifecycleState::Ready),
        }
    }

    pub fn matches(&self, record: &VideoRecord) -> bool {
        self.uploader_id
            .as_deref()
            .map_or(true, |u| u == record.uploader_id)
            && self
                .state
                .map_or(true, |s| s == record.lifecycle.state())
    }
}

/// Persistence for video records.
///
/// Every call touches a single record. `update` is a partial, versioned
/// read-modify-write: fields the update leaves `None` keep whatever was
/// written concurrently by other writers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: VideoRecord) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError>;

    /// Apply `update` if the stored version equals `expected_version`
    /// (or unconditionally when `None`). Returns the updated record.
    async fn update(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        update: RecordUpdate,
    ) -> Result<VideoRecord, StoreError>;

    /// Records matching `filter`, oldest first.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<VideoRecord>, StoreError>;
}
