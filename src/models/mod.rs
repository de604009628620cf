use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use utoipa::ToSchema;

/// One incoming upload, consumed exactly once by the upload service.
///
/// `filename` and `declared_size` come straight from the client and are
/// never trusted for security decisions.
pub struct UploadRequest<R> {
    pub owner_id: String,
    pub filename: String,
    pub declared_size: Option<u64>,
    pub body: R,
}

impl<R: AsyncRead + Unpin + Send> UploadRequest<R> {
    pub fn new(owner_id: impl Into<String>, filename: impl Into<String>, body: R) -> Self {
        Self {
            owner_id: owner_id.into(),
            filename: filename.into(),
            declared_size: None,
            body,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Outcome of a magic-number inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub detected_mime_type: Option<&'static str>,
    pub detected_extension: Option<&'static str>,
    pub error: Option<String>,
}

/// A fully verified file sitting at its final path
#[derive(Debug, Clone)]
pub struct FinalizedAttachment {
    pub owner_id: String,
    pub original_filename: String,
    pub stored_name: String,
    pub storage_path: PathBuf,
    pub url: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub extension: String,
    pub sha256: String,
    pub attachment_id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<i64>,
}

impl From<FinalizedAttachment> for UploadResponse {
    fn from(file: FinalizedAttachment) -> Self {
        Self {
            url: file.url,
            filename: file.original_filename,
            size: file.byte_size,
            mime_type: file.mime_type,
            sha256: file.sha256,
            attachment_id: file.attachment_id,
        }
    }
}
