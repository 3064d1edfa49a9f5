use crate::models::UploadStatus;
use crate::services::upload_record::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Upload(e) => match &e {
                UploadError::FieldNotFound(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                UploadError::UploadFailed { code, message, .. } => {
                    let status = match UploadStatus::from_code(*code) {
                        Some(UploadStatus::ExceedsServerLimit | UploadStatus::ExceedsFormLimit) => {
                            StatusCode::PAYLOAD_TOO_LARGE
                        }
                        _ => StatusCode::BAD_REQUEST,
                    };
                    (status, message.to_string())
                }
                UploadError::MoveFailed { .. } => {
                    tracing::error!("Move error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error".to_string(),
                    )
                }
            },
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
