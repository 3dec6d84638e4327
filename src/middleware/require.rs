use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::MethodRouter,
};

use crate::{
    auth::{
        repo::PermissionRepo,
        repo_types::{CurrentUser, User},
    },
    error::AppError,
    state::AppState,
};

pub fn require_authenticated_user(current: &CurrentUser) -> Result<&User, AppError> {
    match current {
        CurrentUser::Anonymous => Err(AppError::AuthenticationRequired),
        CurrentUser::Registered(user) => Ok(user),
    }
}

pub fn require_activated_user(current: &CurrentUser) -> Result<&User, AppError> {
    let user = require_authenticated_user(current)?;
    if !user.activated {
        return Err(AppError::InactiveAccount);
    }
    Ok(user)
}

#[derive(Clone)]
pub struct PermissionGate {
    code: &'static str,
    permissions: Arc<dyn PermissionRepo>,
}

/// Authenticated, then activated, then holding `gate.code`; the first failing
/// check decides the response.
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = match req.extensions().get::<CurrentUser>() {
        Some(current) => require_activated_user(current)?.id,
        None => return Err(AppError::AuthenticationRequired),
    };

    let permissions = gate.permissions.get_all_for_user(user_id).await?;
    if !permissions.include(gate.code) {
        return Err(AppError::NotPermitted);
    }
    Ok(next.run(req).await)
}

/// Gates every method of `route` behind `code`. The method fallback (405)
/// stays ungated.
pub fn permitted(
    state: &AppState,
    code: &'static str,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    let gate = PermissionGate {
        code,
        permissions: state.models.permissions.clone(),
    };
    route.route_layer(from_fn_with_state(gate, require_permission))
}
