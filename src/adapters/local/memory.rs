//! In-process RecordStore for the monolith.

use crate::domain::record::{RecordUpdate, VideoRecord};
use crate::ports::repository::{RecordFilter, RecordStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, VideoRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the view counter the way a playback endpoint would.
    #[cfg(test)]
    pub(crate) async fn record_view(&self, id: Uuid) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.view_count += 1;
        record.version += 1;
        Ok(record.view_count)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: VideoRecord) -> Result<Uuid, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        record.check_invariants()?;
        let id = record.id;
        records.insert(id, record);
        debug!(record_id = %id, "record created");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        update: RecordUpdate,
    ) -> Result<VideoRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(expected) = expected_version {
            if record.version != expected {
                return Err(StoreError::VersionConflict {
                    id,
                    expected,
                    actual: record.version,
                });
            }
        }
        record.apply(update)?;
        debug!(record_id = %id, version = record.version, state = %record.lifecycle.state(), "record updated");
        Ok(record.clone())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<VideoRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<VideoRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::{AssetKind, StoredAsset};
    use crate::domain::record::{Lifecycle, LifecycleState, RecordError};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn record(uploader: &str) -> VideoRecord {
        VideoRecord::new(uploader.into(), "clip".into(), Some("a clip".into()))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryRecordStore::new();
        let rec = record("u1");
        let id = store.create(rec.clone()).await.unwrap();

        assert_eq!(id, rec.id);
        assert_eq!(store.get(id).await.unwrap(), Some(rec));
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryRecordStore::new();
        let rec = record("u1");
        store.create(rec.clone()).await.unwrap();
        assert!(matches!(
            store.create(rec).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let store = InMemoryRecordStore::new();
        let id = store.create(record("u1")).await.unwrap();

        store
            .update(id, Some(0), RecordUpdate::transition(Lifecycle::Storing))
            .await
            .unwrap();

        let stale = store
            .update(id, Some(0), RecordUpdate::transition(Lifecycle::Segmenting))
            .await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        let current = store.get(id).await.unwrap().unwrap();
        assert_eq!(current.lifecycle, Lifecycle::Storing);
    }

    #[tokio::test]
    async fn test_update_does_not_clobber_counters() {
        let store = InMemoryRecordStore::new();
        let id = store.create(record("u1")).await.unwrap();

        let before = store.get(id).await.unwrap().unwrap();
        assert_eq!(store.record_view(id).await.unwrap(), 1);

        // A writer holding the old version loses and must re-read.
        let result = store
            .update(id, Some(before.version), RecordUpdate::transition(Lifecycle::Storing))
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

        let fresh = store.get(id).await.unwrap().unwrap();
        let thumb = StoredAsset::new(AssetKind::Thumbnail, PathBuf::from("u1/x/thumbnail.jpg"), 3);
        let updated = store
            .update(
                id,
                Some(fresh.version),
                RecordUpdate::transition(Lifecycle::Storing).with_thumbnail(thumb.clone()),
            )
            .await
            .unwrap();
        assert_eq!(updated.view_count, 1);
        assert_eq!(updated.thumbnail, Some(thumb));
    }

    #[tokio::test]
    async fn test_rejected_transition_surfaces() {
        let store = InMemoryRecordStore::new();
        let id = store.create(record("u1")).await.unwrap();
        let result = store
            .update(id, None, RecordUpdate::transition(Lifecycle::Segmenting))
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected(RecordError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryRecordStore::new();
        let result = store
            .update(Uuid::new_v4(), None, RecordUpdate::transition(Lifecycle::Storing))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = Arc::new(InMemoryRecordStore::new());
        let a = store.create(record("alice")).await.unwrap();
        let b = store.create(record("bob")).await.unwrap();
        store.create(record("alice")).await.unwrap();
        store
            .update(a, None, RecordUpdate::transition(Lifecycle::Storing))
            .await
            .unwrap();

        let all = store.list(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let alice = RecordFilter {
            uploader_id: Some("alice".into()),
            state: None,
        };
        assert_eq!(store.list(&alice).await.unwrap().len(), 2);

        let pending = RecordFilter {
            uploader_id: None,
            state: Some(LifecycleState::Pending),
        };
        let ids: Vec<Uuid> = store.list(&pending).await.unwrap().iter().map(|r| r.id).collect();
        assert!(ids.contains(&b));
        assert!(!ids.contains(&a));

        assert!(store.list(&RecordFilter::playable()).await.unwrap().is_empty());
    }
}
