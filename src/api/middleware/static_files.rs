use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};

/// Refuses paths with a dot-prefixed segment so the staging area under the
/// upload directory is never served
pub async fn deny_hidden_paths(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req
        .uri()
        .path()
        .split('/')
        .any(|segment| segment.starts_with('.') || segment.to_ascii_lowercase().starts_with("%2e"))
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(next.run(req).await)
}
