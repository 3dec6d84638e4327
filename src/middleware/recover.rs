use std::any::Any;

use axum::{
    http::{header, HeaderValue},
    response::Response,
};
use tracing::debug;

use crate::{
    background::panic_message,
    error::{envelope, AppError},
};

/// Turns a handler panic into a 500 and asks the client to drop the
/// connection.
///
/// The panic hook installed at startup has already written the ERROR record
/// (message and location) by the time this runs, so only the envelope is
/// produced here.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(panic.as_ref());
    debug!(%detail, "recovered handler panic");
    let err = AppError::ServerError(anyhow::anyhow!("handler panicked: {detail}"));
    let mut response = envelope(err.status(), "error", err.to_string());
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
