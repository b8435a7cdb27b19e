use super::AppState;
use crate::catalog::ServerDefinition;
use crate::engine::StartConfiguration;
use crate::error::Result;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;

pub async fn list(State(state): State<AppState>) -> Json<Vec<ServerDefinition>> {
    Json(state.orchestrator.catalog().list_all().to_vec())
}

pub async fn show(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<ServerDefinition>> {
    Ok(Json(state.orchestrator.catalog().resolve(&kind)?.clone()))
}

/// Accept a start request; progress is reported on the returned `reqId`.
pub async fn start(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: std::result::Result<Json<StartConfiguration>, JsonRejection>,
) -> Response {
    let config = match body {
        Ok(Json(config)) => config,
        Err(rejection) => {
            return super::error::reject(
                StatusCode::BAD_REQUEST,
                format!("Invalid configuration: {}", rejection.body_text()),
            );
        }
    };

    let request_id = state.orchestrator.start_async(&kind, config);
    info!("Accepted start of {} as request {}", kind, request_id);
    (StatusCode::ACCEPTED, Json(json!({ "reqId": request_id }))).into_response()
}
