use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use common::types::FileResponse;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::observability::{OBJECT_READS_TOTAL, OBJECT_READ_DURATION, OBJECT_READ_ERRORS_TOTAL};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReadFileQuery {
    pub path: Option<String>,
}

/// `GET /api/read-file?path=<object>`
pub async fn read_file(
    State(state): State<AppState>,
    query: Result<Query<ReadFileQuery>, QueryRejection>,
) -> Result<Json<FileResponse>, ApiError> {
    let Query(q) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    read_object(&state, q.path.as_deref().unwrap_or_default()).await
}

/// `GET /api/read-file/<object...>`
pub async fn read_file_at(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<FileResponse>, ApiError> {
    let Path(path) = path.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    read_object(&state, &path).await
}

async fn read_object(state: &AppState, name: &str) -> Result<Json<FileResponse>, ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("file path is required"));
    }

    OBJECT_READS_TOTAL.inc();
    let timer = OBJECT_READ_DURATION.start_timer();
    match state.store.read_object(&state.bucket, name).await {
        Ok(bytes) => {
            let elapsed = timer.stop_and_record();
            info!(bucket = %state.bucket, object = %name, bytes = bytes.len(), elapsed_secs = elapsed, "object served");
            // invalid UTF-8 becomes U+FFFD
            let content = String::from_utf8_lossy(&bytes).into_owned();
            Ok(Json(FileResponse { content, status: 200 }))
        }
        Err(e) => {
            timer.stop_and_discard();
            OBJECT_READ_ERRORS_TOTAL.inc();
            warn!(bucket = %state.bucket, object = %name, error = %e, "object read failed");
            Err(e.into())
        }
    }
}
