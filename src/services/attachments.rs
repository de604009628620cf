use crate::entities::attachments;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Descriptor handed to the metadata store once a file is finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub owner_id: String,
    pub stored_name: String,
    pub extension: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub sha256: String,
    pub url: String,
}

/// Record-keeping for finalized uploads. Failures here never fail an upload.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Persists the descriptor and returns the record id
    async fn finalize(&self, attachment: NewAttachment) -> Result<i64>;
}

pub struct DbAttachmentStore {
    db: DatabaseConnection,
}

impl DbAttachmentStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AttachmentStore for DbAttachmentStore {
    async fn finalize(&self, attachment: NewAttachment) -> Result<i64> {
        let record = attachments::ActiveModel {
            user_id: Set(attachment.owner_id),
            post_id: Set(None),
            filename: Set(attachment.stored_name),
            file_type: Set(attachment.extension),
            file_size: Set(i64::try_from(attachment.byte_size)?),
            url: Set(attachment.url),
            is_image: Set(attachment.mime_type.starts_with("image/")),
            mime_type: Set(Some(attachment.mime_type)),
            sha256: Set(attachment.sha256),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let saved = record.insert(&self.db).await?;
        Ok(i64::from(saved.id))
    }
}
