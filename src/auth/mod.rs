pub mod dto;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod tokens;

use axum::{
    routing::{post, put},
    Router,
};

use crate::{app::bind, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/users", bind(post(handlers::register_user)))
        .route("/v1/users/activated", bind(put(handlers::activate_user)))
        .route("/v1/users/password", bind(put(handlers::update_user_password)))
        .route(
            "/v1/tokens/authentication",
            bind(post(handlers::create_authentication_token)),
        )
        .route(
            "/v1/tokens/activation",
            bind(post(handlers::create_activation_token)),
        )
        .route(
            "/v1/tokens/password-reset",
            bind(post(handlers::create_password_reset_token)),
        )
}
