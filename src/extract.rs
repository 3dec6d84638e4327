use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::{request::Parts, StatusCode},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::{error::AppError, validator::Validator};

/// Largest request body accepted by [`JsonBody`].
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Strict JSON body: exactly one value, no unknown keys, at most
/// [`MAX_BODY_BYTES`]. Failures become 400s with a message naming the problem.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::BadRequest(format!("body must not be larger than {MAX_BODY_BYTES} bytes"))
            } else {
                AppError::BadRequest(rejection.body_text())
            }
        })?;
        decode(&body).map(JsonBody)
    }
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest("body must not be empty".into()));
    }

    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(describe)?;
    de.end().map_err(|_| {
        AppError::BadRequest("body must only contain a single JSON value".into())
    })?;
    Ok(value)
}

fn describe(err: serde_json::Error) -> AppError {
    let message = match err.classify() {
        Category::Syntax => format!(
            "body contains badly-formed JSON (at line {}, column {})",
            err.line(),
            err.column()
        ),
        Category::Eof => "body contains badly-formed JSON".to_owned(),
        Category::Data => {
            let text = err.to_string();
            match text.strip_prefix("unknown field ") {
                Some(rest) => {
                    let key = rest.split(',').next().unwrap_or(rest);
                    format!("body contains unknown key {key}")
                }
                None => format!("body contains incorrect JSON type ({text})"),
            }
        }
        Category::Io => err.to_string(),
    };
    AppError::BadRequest(message)
}

/// `:id` path segment. Anything that is not a positive integer is a 404.
#[derive(Debug, Clone, Copy)]
pub struct IdParam(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for IdParam
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotFound)?;
        match raw.parse::<i64>() {
            Ok(id) if id >= 1 => Ok(IdParam(id)),
            _ => Err(AppError::NotFound),
        }
    }
}

/// Query-string readers. Missing keys fall back to the default; malformed
/// integers are recorded on the validator.
pub fn read_string(qs: &HashMap<String, String>, key: &str, default: &str) -> String {
    qs.get(key)
        .filter(|s| !s.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_owned())
}

pub fn read_csv(qs: &HashMap<String, String>, key: &str) -> Vec<String> {
    match qs.get(key) {
        Some(s) if !s.is_empty() => s.split(',').map(str::to_owned).collect(),
        _ => Vec::new(),
    }
}

pub fn read_int(qs: &HashMap<String, String>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match qs.get(key).filter(|s| !s.is_empty()) {
        None => default,
        Some(s) => s.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}
