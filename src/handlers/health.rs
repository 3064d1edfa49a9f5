use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub temp_dir: String,
    pub upload_dir: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let temp_dir = dir_status(&state.config.temp_dir).await;
    let upload_dir = dir_status(&state.config.upload_dir).await;
    let status = if temp_dir == "ok" && upload_dir == "ok" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        temp_dir: temp_dir.to_string(),
        upload_dir: upload_dir.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn dir_status(path: &Path) -> &'static str {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => "ok",
        _ => "missing",
    }
}
