pub mod auth;
pub mod request_id;
pub mod static_files;
