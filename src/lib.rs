pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::attachments::{AttachmentStore, DbAttachmentStore};
use crate::services::storage::{DurableWriter, FsyncWriter};
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Allowance for multipart framing on top of the file size limit
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_image,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::UploadResponse,
            api::handlers::upload::ImageUploadForm,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Attachment upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub upload_service: Arc<UploadService>,
    pub config: UploadConfig,
}

impl AppState {
    /// Wires the upload service with the fsync writer and the database-backed attachment store
    pub fn new(db: DatabaseConnection, config: UploadConfig) -> Self {
        let writer: Arc<dyn DurableWriter> = Arc::new(FsyncWriter::new(config.chunk_size));
        let attachments: Arc<dyn AttachmentStore> = Arc::new(DbAttachmentStore::new(db.clone()));
        Self::with_collaborators(db, config, writer, attachments)
    }

    pub fn with_collaborators(
        db: DatabaseConnection,
        config: UploadConfig,
        writer: Arc<dyn DurableWriter>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        let upload_service = Arc::new(UploadService::new(config.clone(), writer, attachments));
        Self {
            db,
            upload_service,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let mut app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload/image",
            post(api::handlers::upload::upload_image)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        );

    // Finalized files are served locally only when the public URL is a path on this host
    if state.config.public_url.starts_with('/') {
        let files = Router::new()
            .fallback_service(ServeDir::new(&state.config.upload_dir))
            .layer(from_fn(api::middleware::static_files::deny_hidden_paths));
        app = app.nest(&state.config.public_url, files);
    }

    app.layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
