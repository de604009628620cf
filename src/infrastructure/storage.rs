use crate::config::UploadConfig;
use crate::services::storage::ensure_dir;
use tracing::info;

/// Prepares the upload and staging directories. Idempotent.
pub async fn setup_storage(config: &UploadConfig) -> anyhow::Result<()> {
    for dir in [&config.upload_dir, &config.staging_dir] {
        ensure_dir(dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create directory {}: {}", dir.display(), e))?;
    }

    info!(
        "💾 Upload storage: {} (staging: {}, public: {})",
        config.upload_dir.display(),
        config.staging_dir.display(),
        config.public_url
    );
    Ok(())
}
