use crate::api::error::AppError;
use crate::services::intake::collect_uploads;
use crate::services::upload_record::{UploadError, UploadRecord};
use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_FIELD: &str = "file";

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Form field holding the file (default: "file")
    #[serde(default = "default_field")]
    pub field: String,
}

fn default_field() -> String {
    DEFAULT_FIELD.to_string()
}

#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub field: String,
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub mime_type: String,
}

#[utoipa::path(
    post,
    path = "/upload",
    params(UploadQuery),
    request_body(content = UploadForm, content_type = "multipart/form-data", description = "File upload"),
    responses(
        (status = 200, description = "File stored in the upload directory", body = UploadResponse),
        (status = 400, description = "Field missing or upload rejected"),
        (status = 413, description = "File exceeds the size limit")
    ),
    tag = "files"
)]
pub async fn upload_file(
    State(state): State<crate::AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let table = collect_uploads(multipart, &state.config).await;
    let upload_dir = state.config.upload_dir.clone();
    let filenames = state.filenames.clone();

    // The table drops at the end of this task, removing whatever was not moved
    let response = tokio::task::spawn_blocking(move || -> Result<UploadResponse, UploadError> {
        let record = UploadRecord::new(&table, &query.field)?.with_filenames(filenames);
        let path = record.move_to(&upload_dir)?;

        Ok(UploadResponse {
            field: record.field().to_string(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().into_owned(),
            size: record.size(),
            mime_type: record.mime_type().to_string(),
        })
    })
    .await
    .map_err(|e| AppError::Internal(format!("Upload task failed: {}", e)))??;

    Ok(Json(response))
}
