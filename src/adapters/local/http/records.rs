use super::{store_error, ApiError, AppState};
use crate::domain::record::{LifecycleState, VideoRecord};
use crate::ports::repository::{RecordFilter, RecordStore};
use crate::ports::transform::Transform;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub uploader_id: Option<String>,
    pub state: Option<LifecycleState>,
}

impl From<ListQuery> for RecordFilter {
    fn from(query: ListQuery) -> Self {
        RecordFilter {
            uploader_id: query.uploader_id,
            state: query.state,
        }
    }
}

pub async fn get_record<S, T>(
    State(state): State<AppState<S, T>>,
    Path(id): Path<Uuid>,
) -> Result<Json<VideoRecord>, ApiError>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    state
        .pool
        .orchestrator()
        .store()
        .get(id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("record {id} not found")))
}

pub async fn list<S, T>(
    State(state): State<AppState<S, T>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<VideoRecord>>, ApiError>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    let filter = RecordFilter::from(query);
    let records = state
        .pool
        .orchestrator()
        .store()
        .list(&filter)
        .await
        .map_err(store_error)?;
    Ok(Json(records))
}

/// Cancel a queued or running ingestion.
pub async fn cancel<S, T>(
    State(state): State<AppState<S, T>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
    S: RecordStore + 'static,
    T: Transform + 'static,
{
    if state.pool.cancel(id) {
        info!(record_id = %id, "cancellation requested");
        return Ok(StatusCode::ACCEPTED);
    }
    match state
        .pool
        .orchestrator()
        .store()
        .get(id)
        .await
        .map_err(store_error)?
    {
        Some(record) => Err((
            StatusCode::CONFLICT,
            format!("record {id} is {} and not in progress", record.lifecycle.state()),
        )),
        None => Err((StatusCode::NOT_FOUND, format!("record {id} not found"))),
    }
}
