//! Background ingestion pool.
//!
//! `submit` accepts the upload right away and hands processing to a task.
//! A semaphore bounds how many ingestions run at once; the rest wait for a
//! permit in `pending`. A job cancelled while waiting ends `failed(cancelled)`
//! without touching storage.

use super::orchestrator::{IngestRequest, IngestionError, Orchestrator};
use crate::domain::record::VideoRecord;
use crate::ports::repository::RecordStore;
use crate::ports::transform::Transform;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

type Jobs = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

fn lock(jobs: &Jobs) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct IngestionPool<S, T> {
    orchestrator: Arc<Orchestrator<S, T>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    jobs: Jobs,
}

impl<S, T> IngestionPool<S, T>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    pub fn new(orchestrator: Orchestrator<S, T>, max_concurrent: usize) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<S, T> {
        &self.orchestrator
    }

    /// Accept the upload and process it in the background. The returned
    /// record is `pending`; progress is visible through the record store.
    pub async fn submit(&self, request: IngestRequest) -> Result<VideoRecord, IngestionError> {
        if self.shutdown.is_cancelled() {
            return Err(IngestionError::Cancelled);
        }

        let IngestRequest {
            uploader_id,
            title,
            description,
            thumbnail,
            video,
        } = request;
        let record = self
            .orchestrator
            .accept(uploader_id, title, description)
            .await?;

        let id = record.id;
        let cancel = self.shutdown.child_token();
        lock(&self.jobs).insert(id, cancel.clone());

        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        let jobs = self.jobs.clone();
        let accepted = record.clone();

        self.tracker.spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    info!(record_id = %id, "ingestion cancelled before it started");
                    orchestrator.abandon(id).await;
                    lock(&jobs).remove(&id);
                    return;
                }
            };

            match permit {
                Ok(_permit) => {
                    if let Err(err) = orchestrator.process(record, thumbnail, video, &cancel).await {
                        warn!(record_id = %id, error = %err, "ingestion did not complete");
                    }
                }
                Err(_) => warn!(record_id = %id, "ingestion pool closed"),
            }
            lock(&jobs).remove(&id);
        });

        Ok(accepted)
    }

    /// Cancel one ingestion. Returns false when it is not running or queued.
    pub fn cancel(&self, id: Uuid) -> bool {
        match lock(&self.jobs).get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ingestions that are queued or running.
    pub fn in_flight(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Cancel every ingestion and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "shutting down ingestion pool");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
