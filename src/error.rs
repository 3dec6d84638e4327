use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::{db::DataError, validator::FieldErrors};

/// Every failure a handler or middleware can surface to a client.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("failed validation")]
    FailedValidation(FieldErrors),
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidAuthToken,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("the server encountered a problem and could not process your request")]
    ServerError(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidCredentials
            | AppError::InvalidAuthToken
            | AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            AppError::InactiveAccount | AppError::NotPermitted => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_owned(), message.to_owned());
        AppError::FailedValidation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = match &self {
            AppError::ServerError(err) => {
                error!(error = %format!("{err:#}"), "server error");
                envelope(status, "error", self.to_string())
            }
            AppError::FailedValidation(errors) => envelope(status, "error", errors),
            other => envelope(status, "error", other.to_string()),
        };
        if matches!(self, AppError::InvalidAuthToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::RecordNotFound => AppError::NotFound,
            DataError::EditConflict => AppError::EditConflict,
            DataError::DuplicateEmail => {
                AppError::validation("email", "a user with this email address already exists")
            }
            other => AppError::ServerError(other.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ServerError(err)
    }
}

/// Wraps `payload` as `{"<key>": payload}`.
pub fn envelope<T: Serialize>(status: StatusCode, key: &str, payload: T) -> Response {
    match serde_json::to_value(payload) {
        Ok(value) => respond(status, json!({ key: value })),
        Err(e) => encode_failed(e),
    }
}

/// Serializes `body` as the whole response. If it cannot be encoded the
/// client gets a bare 500 with no body.
pub fn respond<T: Serialize>(status: StatusCode, body: T) -> Response {
    match serde_json::to_vec(&body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            bytes,
        )
            .into_response(),
        Err(e) => encode_failed(e),
    }
}

fn encode_failed(err: serde_json::Error) -> Response {
    error!(error = %err, "unable to encode response body");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}

pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method)
}
