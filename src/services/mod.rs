pub mod attachments;
pub mod storage;
pub mod upload_service;
