use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    auth::{
        repo::UserRepo,
        repo_types::{CurrentUser, Scope},
        tokens,
    },
    db::DataError,
    error::AppError,
    validator::Validator,
};

/// Resolves the bearer token (if any) to a [`CurrentUser`] stored in the
/// request extensions. Every response varies on `Authorization`.
pub async fn authenticate(
    State(users): State<Arc<dyn UserRepo>>,
    mut req: Request,
    next: Next,
) -> Response {
    let resolved = resolve(users.as_ref(), req.headers()).await;
    let mut response = match resolved {
        Ok(current) => {
            req.extensions_mut().insert(current);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    };
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

async fn resolve(users: &dyn UserRepo, headers: &HeaderMap) -> Result<CurrentUser, AppError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(CurrentUser::Anonymous);
    };
    if value.is_empty() {
        return Ok(CurrentUser::Anonymous);
    }
    let value = value.to_str().map_err(|_| AppError::InvalidAuthToken)?;

    let mut parts = value.split(' ');
    let token = match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => token,
        _ => return Err(AppError::InvalidAuthToken),
    };

    let mut v = Validator::new();
    tokens::validate_plaintext(&mut v, token);
    if !v.valid() {
        return Err(AppError::InvalidAuthToken);
    }

    match users.get_for_token(Scope::Authentication, token).await {
        Ok(user) => Ok(CurrentUser::Registered(user)),
        Err(DataError::RecordNotFound) => Err(AppError::InvalidAuthToken),
        Err(e) => Err(e.into()),
    }
}
