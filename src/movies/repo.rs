use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{
    filters::{Filters, Metadata},
    repo_types::{Movie, MovieRow},
};
use crate::db::{bounded, DataError};

#[async_trait]
pub trait MovieRepo: Send + Sync {
    /// Fills in `id`, `created_at` and `version` on success.
    async fn insert(&self, movie: &mut Movie) -> Result<(), DataError>;
    async fn get(&self, id: i64) -> Result<Movie, DataError>;
    /// Optimistic update keyed on `(id, version)`; bumps `version` on success.
    async fn update(&self, movie: &mut Movie) -> Result<(), DataError>;
    async fn delete(&self, id: i64) -> Result<(), DataError>;
    /// Full-text title match (empty matches all) and genre containment
    /// (empty matches all), sorted with `id ASC` as tie-breaker.
    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError>;
}

#[derive(Clone)]
pub struct PgMovies {
    db: PgPool,
}

impl PgMovies {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

type ListedRow = (i64, i64, OffsetDateTime, String, i32, i32, Vec<String>, i32);

#[async_trait]
impl MovieRepo for PgMovies {
    async fn insert(&self, movie: &mut Movie) -> Result<(), DataError> {
        let (id, created_at, version) = bounded(
            sqlx::query_as::<_, (i64, OffsetDateTime, i32)>(
                r#"
                INSERT INTO movies (title, year, runtime, genres)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.0)
            .bind(&movie.genres)
            .fetch_one(&self.db),
        )
        .await?;

        movie.id = id;
        movie.created_at = created_at;
        movie.version = version;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Movie, DataError> {
        if id < 1 {
            return Err(DataError::RecordNotFound);
        }
        let row = bounded(
            sqlx::query_as::<_, MovieRow>(
                r#"
                SELECT id, created_at, title, year, runtime, genres, version
                FROM movies
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await?;
        row.map(Movie::from).ok_or(DataError::RecordNotFound)
    }

    async fn update(&self, movie: &mut Movie) -> Result<(), DataError> {
        let version = bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE movies
                SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.0)
            .bind(&movie.genres)
            .bind(movie.id)
            .bind(movie.version)
            .fetch_optional(&self.db),
        )
        .await?;

        movie.version = version.ok_or(DataError::EditConflict)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), DataError> {
        if id < 1 {
            return Err(DataError::RecordNotFound);
        }
        let result = bounded(
            sqlx::query("DELETE FROM movies WHERE id = $1")
                .bind(id)
                .execute(&self.db),
        )
        .await?;
        if result.rows_affected() == 0 {
            return Err(DataError::RecordNotFound);
        }
        Ok(())
    }

    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError> {
        // sort_column/sort_direction only ever return safelisted literals.
        let query = format!(
            r#"
            SELECT count(*) OVER(), id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
              AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort_column(),
            filters.sort_direction()
        );

        let rows = bounded(
            sqlx::query_as::<_, ListedRow>(&query)
                .bind(title)
                .bind(genres)
                .bind(filters.limit())
                .bind(filters.offset())
                .fetch_all(&self.db),
        )
        .await?;

        let total_records = rows.first().map(|row| row.0).unwrap_or(0);
        let movies = rows
            .into_iter()
            .map(|(_, id, created_at, title, year, runtime, genres, version)| {
                Movie::from(MovieRow {
                    id,
                    created_at,
                    title,
                    year,
                    runtime,
                    genres,
                    version,
                })
            })
            .collect();

        Ok((
            movies,
            Metadata::calculate(total_records, filters.page, filters.page_size),
        ))
    }
}
