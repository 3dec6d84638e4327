use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    auth::repo::{PermissionRepo, PgPermissions, PgTokens, PgUsers, TokenRepo, UserRepo},
    background::Background,
    config::AppConfig,
    db,
    mailer::{Mailer, SmtpMailer},
    metrics::Metrics,
    middleware::rate_limit::RateLimiter,
    movies::repo::{MovieRepo, PgMovies},
};

/// Data access, one trait object per entity.
#[derive(Clone)]
pub struct Models {
    pub users: Arc<dyn UserRepo>,
    pub tokens: Arc<dyn TokenRepo>,
    pub permissions: Arc<dyn PermissionRepo>,
    pub movies: Arc<dyn MovieRepo>,
}

impl Models {
    pub fn postgres(db: &PgPool) -> Self {
        Self {
            users: Arc::new(PgUsers::new(db.clone())),
            tokens: Arc::new(PgTokens::new(db.clone())),
            permissions: Arc::new(PgPermissions::new(db.clone())),
            movies: Arc::new(PgMovies::new(db.clone())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub models: Models,
    pub mailer: Arc<dyn Mailer>,
    pub background: Background,
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::open_pool(&config.db).await?;
        let mailer = Arc::new(SmtpMailer::new(&config.smtp)?) as Arc<dyn Mailer>;
        let models = Models::postgres(&db);
        Ok(Self::from_parts(db, config, models, mailer))
    }

    pub fn from_parts(
        db: PgPool,
        config: AppConfig,
        models: Models,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.limiter));
        Self {
            db,
            config: Arc::new(config),
            models,
            mailer,
            background: Background::new(),
            metrics: Arc::new(Metrics::default()),
            limiter,
        }
    }
}
