use axum::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use super::{
    repo_types::{Permissions, Scope, Token, User, UserRow},
    tokens,
};
use crate::db::{bounded, DataError};

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fills in `id`, `created_at` and `version` on success.
    async fn insert(&self, user: &mut User) -> Result<(), DataError>;
    async fn get_by_email(&self, email: &str) -> Result<User, DataError>;
    /// Optimistic update keyed on `(id, version)`; bumps `version` on success.
    async fn update(&self, user: &mut User) -> Result<(), DataError>;
    /// Owner of an unexpired token with this plaintext and scope.
    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User, DataError>;
}

#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), DataError>;
    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError>;

    async fn new_token(&self, user_id: i64, ttl: Duration, scope: Scope) -> Result<Token, DataError> {
        let token = tokens::generate(user_id, ttl, scope);
        self.insert(&token).await?;
        Ok(token)
    }
}

#[async_trait]
pub trait PermissionRepo: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, DataError>;
    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), DataError>;
}

fn map_unique_email(err: DataError) -> DataError {
    match err {
        DataError::Database(sqlx::Error::Database(db))
            if db.constraint() == Some("users_email_key") =>
        {
            DataError::DuplicateEmail
        }
        other => other,
    }
}

#[derive(Clone)]
pub struct PgUsers {
    db: PgPool,
}

impl PgUsers {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUsers {
    async fn insert(&self, user: &mut User) -> Result<(), DataError> {
        let (id, created_at, version) = bounded(
            sqlx::query_as::<_, (i64, OffsetDateTime, i32)>(
                r#"
                INSERT INTO users (name, email, password_hash, activated)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, version
                "#,
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.password.hash())
            .bind(user.activated)
            .fetch_one(&self.db),
        )
        .await
        .map_err(map_unique_email)?;

        user.id = id;
        user.created_at = created_at;
        user.version = version;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, DataError> {
        let row = bounded(
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, created_at, name, email, password_hash, activated, version
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email)
            .fetch_optional(&self.db),
        )
        .await?;
        row.map(User::from).ok_or(DataError::RecordNotFound)
    }

    async fn update(&self, user: &mut User) -> Result<(), DataError> {
        let version = bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE users
                SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.password.hash())
            .bind(user.activated)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(map_unique_email)?;

        user.version = version.ok_or(DataError::EditConflict)?;
        Ok(())
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User, DataError> {
        let hash = tokens::digest(plaintext);
        let row = bounded(
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT users.id, users.created_at, users.name, users.email,
                       users.password_hash, users.activated, users.version
                FROM users
                INNER JOIN tokens ON users.id = tokens.user_id
                WHERE tokens.hash = $1
                  AND tokens.scope = $2
                  AND tokens.expiry > $3
                "#,
            )
            .bind(&hash[..])
            .bind(scope.as_str())
            .bind(OffsetDateTime::now_utc())
            .fetch_optional(&self.db),
        )
        .await?;
        row.map(User::from).ok_or(DataError::RecordNotFound)
    }
}

#[derive(Clone)]
pub struct PgTokens {
    db: PgPool,
}

impl PgTokens {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenRepo for PgTokens {
    async fn insert(&self, token: &Token) -> Result<(), DataError> {
        bounded(
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash[..])
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError> {
        bounded(
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.db),
        )
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgPermissions {
    db: PgPool,
}

impl PgPermissions {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PermissionRepo for PgPermissions {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, DataError> {
        let codes = bounded(
            sqlx::query_scalar::<_, String>(
                r#"
                SELECT permissions.code
                FROM permissions
                INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
                WHERE users_permissions.user_id = $1
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.db),
        )
        .await?;
        Ok(codes.into_iter().collect())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), DataError> {
        let codes: Vec<String> = codes.iter().map(|c| (*c).to_owned()).collect();
        bounded(
            sqlx::query(
                r#"
                INSERT INTO users_permissions (user_id, permission_id)
                SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(&codes)
            .execute(&self.db),
        )
        .await?;
        Ok(())
    }
}
