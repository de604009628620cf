use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures of the upload pipeline.
///
/// Validation variants carry user-facing messages. Infrastructure variants
/// carry internal detail that is logged but never shown to the caller.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File exceeds the maximum allowed size of {:.2} MB", as_mb(.limit))]
    SizeExceeded { limit: u64 },

    #[error("Unrecognized file format, only JPEG/PNG/GIF/WEBP are supported")]
    UnrecognizedFormat,

    #[error("File type mismatch. Expected: {expected}, detected: {detected}")]
    TypeMismatch { detected: String, expected: String },

    #[error("Incomplete write: expected {expected} bytes, found {actual}")]
    IncompleteWrite { expected: u64, actual: u64 },

    #[error("Storage fault: {0}")]
    DurabilityFault(#[from] std::io::Error),

    #[error("No file provided")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Malformed(String),
}

fn as_mb(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::SizeExceeded { .. } => "SizeExceeded",
            UploadError::UnrecognizedFormat => "UnrecognizedFormat",
            UploadError::TypeMismatch { .. } => "TypeMismatch",
            UploadError::IncompleteWrite { .. } => "IncompleteWrite",
            UploadError::DurabilityFault(_) => "DurabilityFault",
            UploadError::MissingFile => "MissingFile",
            UploadError::Malformed(_) => "Malformed",
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            UploadError::IncompleteWrite { .. } | UploadError::DurabilityFault(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, kind) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
            AppError::Upload(e) => {
                let kind = Some(e.kind());
                match e {
                    UploadError::SizeExceeded { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, e.to_string(), kind)
                    }
                    e if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string(), kind),
                    e => {
                        tracing::error!("Upload fault ({}): {:?}", e.kind(), e);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal Server Error".to_string(),
                            kind,
                        )
                    }
                }
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
        };

        let body = match kind {
            Some(kind) => Json(json!({ "error": message, "kind": kind })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}
