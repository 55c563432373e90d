//! Manual archival trigger.

use axum::Json;
use axum::extract::State;
use chrono::Utc;

use crate::AppState;
use crate::error::AppResult;
use crate::models::ArchivalRunResponse;

/// `POST /api/admin/archival/run`: archive every deactivated user past the
/// retention window, now.
pub async fn run_archival_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ArchivalRunResponse>> {
    let job = state.archival_job();
    let archived = job.run_once(Utc::now()).await?;
    Ok(Json(ArchivalRunResponse {
        retention_days: job.retention().num_days(),
        count: archived.len(),
        archived,
    }))
}
