use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use serde::Serialize;
use tracing::{info, instrument};

use super::{
    dto::{CreateMovieRequest, UpdateMovieRequest},
    filters::{Filters, Metadata, SORT_SAFELIST},
    repo_types::{validate_movie, Movie},
};
use crate::{
    error::{envelope, respond, AppError},
    extract::{read_csv, read_int, read_string, IdParam, JsonBody},
    state::AppState,
    validator::Validator,
};

/// Header a client may send to make an update conditional on the version it
/// last read, rendered in base 32.
pub const EXPECTED_VERSION: &str = "X-Expected-Version";

#[instrument(skip(state, payload))]
pub async fn create_movie(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateMovieRequest>,
) -> Result<Response, AppError> {
    let mut movie = Movie::new(payload.title, payload.year, payload.runtime, payload.genres);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    state.models.movies.insert(&mut movie).await?;
    info!(movie_id = movie.id, "movie created");

    let mut response = envelope(StatusCode::CREATED, "movie", &movie);
    if let Ok(location) = HeaderValue::try_from(format!("/v1/movies/{}", movie.id)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

#[instrument(skip(state))]
pub async fn show_movie(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<Response, AppError> {
    let movie = state.models.movies.get(id).await?;
    Ok(envelope(StatusCode::OK, "movie", &movie))
}

#[instrument(skip(state, headers, payload))]
pub async fn update_movie(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<UpdateMovieRequest>,
) -> Result<Response, AppError> {
    let mut movie = state.models.movies.get(id).await?;

    if let Some(expected) = headers.get(EXPECTED_VERSION) {
        if expected.as_bytes() != version_tag(movie.version).as_bytes() {
            return Err(AppError::EditConflict);
        }
    }

    if let Some(title) = payload.title {
        movie.title = title;
    }
    if let Some(year) = payload.year {
        movie.year = year;
    }
    if let Some(runtime) = payload.runtime {
        movie.runtime = runtime;
    }
    if let Some(genres) = payload.genres {
        movie.genres = genres;
    }

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    state.models.movies.update(&mut movie).await?;
    info!(movie_id = movie.id, version = movie.version, "movie updated");
    Ok(envelope(StatusCode::OK, "movie", &movie))
}

#[instrument(skip(state))]
pub async fn delete_movie(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> Result<Response, AppError> {
    state.models.movies.delete(id).await?;
    info!(movie_id = id, "movie deleted");
    Ok(envelope(StatusCode::OK, "message", "movie successfully deleted"))
}

#[instrument(skip(state))]
pub async fn list_movies(
    State(state): State<AppState>,
    Query(qs): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let mut v = Validator::new();

    let title = read_string(&qs, "title", "");
    let genres = read_csv(&qs, "genres");
    let filters = Filters {
        page: read_int(&qs, "page", 1, &mut v),
        page_size: read_int(&qs, "page_size", 20, &mut v),
        sort: read_string(&qs, "sort", SORT_SAFELIST[0]),
    };

    filters.validate(&mut v);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.into_errors()));
    }

    let (movies, metadata) = state
        .models
        .movies
        .get_all(&title, &genres, &filters)
        .await?;

    Ok(respond(StatusCode::OK, MovieList { movies, metadata }))
}

#[derive(Serialize)]
struct MovieList {
    movies: Vec<Movie>,
    metadata: Metadata,
}

/// Lower-case base-32 rendering of a record version.
pub fn version_tag(version: i32) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

    let mut n = version.unsigned_abs();
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
        if n == 0 {
            break;
        }
    }
    if version < 0 {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
