use super::{ApiError, AppState};
use crate::ports::repository::RecordStore;
use crate::ports::transform::Transform;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Content type of a file in a published segment set.
pub fn media_type(file_name: &str) -> Option<&'static str> {
    let (_, extension) = file_name.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "m3u8" => Some("application/vnd.apple.mpegurl"),
        "ts" => Some("video/MP2T"),
        _ => None,
    }
}

/// Stream a manifest or segment. Nothing outside `segments/` is reachable.
pub async fn serve<S, T>(
    State(state): State<AppState<S, T>>,
    Path((uploader_id, video_id, file_name)): Path<(String, Uuid, String)>,
) -> Result<Response, ApiError>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    let content_type = media_type(&file_name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("{file_name} is not a stream file")))?;
    let path = state
        .pool
        .orchestrator()
        .layout()
        .segment_file(&uploader_id, video_id, &file_name)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let file = File::open(&path).await.map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => (StatusCode::NOT_FOUND, format!("{file_name} not found")),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
