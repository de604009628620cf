use std::env;
use std::path::PathBuf;

/// Default accepted image formats for attachment uploads
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Upload pipeline configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum file size in bytes (default: 10 MB)
    pub max_file_size: u64,

    /// Directory finalized files are served from (default: "./uploads")
    pub upload_dir: PathBuf,

    /// Directory for staged and partially written files (default: "<upload_dir>/.staging")
    pub staging_dir: PathBuf,

    /// Public URL prefix for finalized files, without trailing slash (default: "/uploads")
    pub public_url: String,

    /// MIME types accepted after magic-number detection
    pub allowed_mime_types: Vec<String>,

    /// Read/write buffer size for streaming copies in bytes (default: 64 KB)
    pub chunk_size: usize,

    /// HS256 secret used to validate bearer tokens
    pub jwt_secret: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let upload_dir = PathBuf::from("./uploads");
        Self {
            max_file_size: 10 * 1024 * 1024, // 10 MB
            staging_dir: upload_dir.join(".staging"),
            upload_dir,
            public_url: "/uploads".to_string(),
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            chunk_size: 64 * 1024,
            jwt_secret: "secret".to_string(),
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(default.upload_dir);

        let staging_dir = env::var("UPLOAD_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| upload_dir.join(".staging"));

        Self {
            max_file_size: env::var("UPLOAD_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            upload_dir,
            staging_dir,

            public_url: env::var("UPLOAD_URL")
                .map(|v| normalize_public_url(&v))
                .unwrap_or(default.public_url),

            allowed_mime_types: env::var("UPLOAD_ALLOWED_TYPES")
                .map(|v| parse_mime_list(&v))
                .unwrap_or(default.allowed_mime_types),

            chunk_size: env::var("UPLOAD_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(default.chunk_size),

            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),
        }
    }

    /// Config rooted at an explicit directory, used by tests and local runs
    pub fn development(upload_dir: impl Into<PathBuf>) -> Self {
        let upload_dir = upload_dir.into();
        Self {
            staging_dir: upload_dir.join(".staging"),
            upload_dir,
            ..Self::default()
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Public URL for a stored file name
    pub fn public_url_for(&self, stored_name: &str) -> String {
        format!("{}/{}", self.public_url, stored_name)
    }
}

fn normalize_public_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/uploads".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parses a comma separated MIME list into lowercase essence strings
fn parse_mime_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<mime::Mime>() {
            Ok(m) => Some(m.essence_str().to_lowercase()),
            Err(e) => {
                tracing::warn!("Ignoring invalid MIME type '{}' in UPLOAD_ALLOWED_TYPES: {}", s, e);
                None
            }
        })
        .collect()
}
