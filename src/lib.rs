pub mod api;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::utils::filename::AvailableFilename;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload::upload_file,
        handlers::health::health_check,
    ),
    components(
        schemas(
            handlers::upload::UploadForm,
            handlers::upload::UploadResponse,
            handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "files", description = "File upload endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: UploadConfig,
    pub filenames: Arc<dyn AvailableFilename>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health::health_check))
        .route("/upload", post(handlers::upload::upload_file))
        .with_state(state)
}
