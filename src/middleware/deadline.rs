use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::WRITE_TIMEOUT;
use crate::error::AppError;

/// Abandons a handler that has not produced a response within
/// [`WRITE_TIMEOUT`] and answers with the usual 500 envelope.
pub async fn deadline(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    match tokio::time::timeout(WRITE_TIMEOUT, next.run(req)).await {
        Ok(response) => response,
        Err(_) => AppError::ServerError(anyhow::anyhow!(
            "{method} {uri} exceeded the {}s response deadline",
            WRITE_TIMEOUT.as_secs()
        ))
        .into_response(),
    }
}
