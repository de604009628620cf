use crate::AppState;
use crate::api::error::{AppError, UploadError};
use crate::models::{UploadRequest, UploadResponse};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::{StatusCode, header},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart form accepted by the image upload endpoint (documentation only)
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ImageUploadForm {
    /// Declared byte size of `file`; optional and untrusted
    size: Option<u64>,
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/upload/image",
    request_body(content = ImageUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File uploaded successfully", body = UploadResponse),
        (status = 400, description = "Unrecognized format or type mismatch"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "File too large"),
        (status = 500, description = "Storage failure")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut declared_size: Option<u64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Malformed(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "size" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| UploadError::Malformed(e.to_string()))?;
                declared_size = text.trim().parse().ok();
            }
            "file" => {
                let filename = field.file_name().unwrap_or("unnamed").to_string();
                let part_length = field
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());

                tracing::debug!(
                    "Receiving '{}' (client type: {:?})",
                    filename,
                    field.content_type()
                );

                let body = Box::pin(StreamReader::new(field.map_err(std::io::Error::other)));
                let mut request = UploadRequest::new(claims.sub.clone(), filename, body);
                request.declared_size = declared_size.or(part_length);

                let file = state.upload_service.upload(request).await?;
                return Ok((StatusCode::CREATED, Json(file.into())));
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    tracing::warn!("No file provided in upload request");
    Err(UploadError::MissingFile.into())
}
