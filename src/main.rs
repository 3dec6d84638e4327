use std::{io::Write, sync::Arc};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod auth;
mod background;
mod config;
mod conn;
mod db;
mod error;
mod extract;
mod jsonlog;
mod mailer;
mod metrics;
mod middleware;
mod movies;
mod state;
#[cfg(test)]
mod testing;
mod validator;

use crate::{
    config::AppConfig,
    jsonlog::{JsonLogLayer, Logger, Properties},
    state::AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AppConfig::parse();
    let logger = Arc::new(Logger::stdout(config.log_level));
    init_tracing(logger.clone());

    if let Err(e) = run(config).await {
        logger.print_fatal(&format!("{e:#}"), &Properties::new());
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let state = AppState::init(config).await?;
    info!("database connection pool established");

    if let Err(e) = sqlx::migrate!("./migrations").run(&state.db).await {
        warn!(error = %e, "migration failed; continuing");
    }

    let app = app::build_app(state.clone());
    app::serve(app, &state).await
}

fn init_tracing(logger: Arc<Logger>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("greenreel=info,tower_http=info,axum=info"));
    let pretty = std::env::var("LOG_FORMAT")
        .map(|v| v == "pretty")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if pretty {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    } else {
        registry.with(JsonLogLayer::new(logger.clone())).init();
    }

    // Every panic, caught further up or not, becomes exactly one ERROR record here.
    std::panic::set_hook(Box::new(move |info| {
        let mut out: &Logger = &logger;
        let _ = write!(out, "{info}");
    }));
}
