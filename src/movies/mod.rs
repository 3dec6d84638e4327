pub mod dto;
pub mod filters;
pub mod handlers;
pub mod repo;
pub mod repo_types;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::{
    app::bind,
    auth::repo_types::{MOVIES_READ, MOVIES_WRITE},
    middleware::require::permitted,
    state::AppState,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/v1/movies",
            bind(
                permitted(state, MOVIES_READ, get(handlers::list_movies))
                    .merge(permitted(state, MOVIES_WRITE, post(handlers::create_movie))),
            ),
        )
        .route(
            "/v1/movies/:id",
            bind(
                permitted(state, MOVIES_READ, get(handlers::show_movie)).merge(permitted(
                    state,
                    MOVIES_WRITE,
                    patch(handlers::update_movie).delete(handlers::delete_movie),
                )),
            ),
        )
}
