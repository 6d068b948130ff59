//! HTTP inbound adapter.
//!
//! Uploads are spooled to disk as they arrive and then handed to the
//! ingestion pool. Records are polled by id or listed; published segment
//! sets are served read-only.

mod records;
mod segments;
mod upload;

pub use segments::media_type;

use crate::application::orchestrator::IngestionError;
use crate::application::worker::IngestionPool;
use crate::ports::repository::{RecordStore, StoreError};
use crate::ports::transform::Transform;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub type ApiError = (StatusCode, String);

pub struct AppState<S, T> {
    pub pool: Arc<IngestionPool<S, T>>,
    /// Where multipart file fields are buffered before ingestion.
    pub spool_dir: PathBuf,
}

impl<S, T> Clone for AppState<S, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            spool_dir: self.spool_dir.clone(),
        }
    }
}

pub fn router<S, T>(state: AppState<S, T>) -> Router
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    Router::new()
        .route("/videos", get(records::list::<S, T>))
        .route("/videos/upload", post(upload::upload::<S, T>))
        .route("/videos/:id", get(records::get_record::<S, T>))
        .route("/videos/:id/cancel", post(records::cancel::<S, T>))
        .route(
            "/videos/hls/:uploader_id/:video_id/:file_name",
            get(segments::serve::<S, T>),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) fn ingestion_status(err: &IngestionError) -> StatusCode {
    if err.is_client_error() {
        return StatusCode::BAD_REQUEST;
    }
    match err {
        IngestionError::RecordStoreUnavailable(_) | IngestionError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn ingestion_error(err: IngestionError) -> ApiError {
    (ingestion_status(&err), err.to_string())
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    let status = match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
