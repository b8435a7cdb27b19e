use super::AppState;
use crate::error::Result;
use crate::store::ContainerRecord;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ContainerRecord>>> {
    Ok(Json(state.orchestrator.store().list().await?))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerRecord>> {
    Ok(Json(state.orchestrator.store().get(&id).await?))
}

/// Remove the container and mark its record discarded.
pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let record = state.orchestrator.store().get(&id).await?;
    state.orchestrator.stop(&record.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
