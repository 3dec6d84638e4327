use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DbConfig;

/// Upper bound for a single statement issued by a repository.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("record not found")]
    RecordNotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("query exceeded {}s", QUERY_TIMEOUT.as_secs())]
    QueryTimeout,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Runs a query under [`QUERY_TIMEOUT`].
pub async fn bounded<T, F>(query: F) -> Result<T, DataError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, query).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DataError::QueryTimeout),
    }
}

pub async fn open_pool(cfg: &DbConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_open_conns)
        .idle_timeout(cfg.max_idle_time)
        .acquire_timeout(PING_TIMEOUT)
        .connect_lazy(&cfg.dsn)
        .context("parse database dsn")?;

    tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&pool))
        .await
        .context("database ping timed out")?
        .context("ping database")?;

    Ok(pool)
}
