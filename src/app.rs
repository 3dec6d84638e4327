use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Response,
    routing::{get, MethodRouter},
    Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};

use crate::{
    auth,
    background::Background,
    conn,
    error::{method_not_allowed, not_found, respond},
    extract::MAX_BODY_BYTES,
    metrics,
    middleware::{self, PIPELINE},
    movies,
    state::AppState,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long in-flight requests get to finish once a shutdown signal arrives.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub fn build_app(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/v1/healthcheck", bind(get(healthcheck)))
        .merge(auth::router())
        .merge(movies::router(&state));
    if state.config.metrics {
        routes = routes.route("/debug/vars", bind(get(metrics::debug_vars)));
    }

    let routes = routes
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state.clone());

    if state.config.limiter.enabled {
        state.limiter.spawn_sweeper();
    }

    middleware::compose(&PIPELINE, &state, routes)
}

/// Answers methods the route does not register with a JSON 405.
pub fn bind(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.fallback(method_not_allowed)
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    system_info: SystemInfo<'a>,
}

#[derive(Serialize)]
struct SystemInfo<'a> {
    environment: &'a str,
    version: &'static str,
}

pub async fn healthcheck(State(state): State<AppState>) -> Response {
    respond(
        StatusCode::OK,
        Health {
            status: "available",
            system_info: SystemInfo {
                environment: &state.config.env,
                version: VERSION,
            },
        },
    )
}

pub async fn serve(app: Router, state: &AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!(addr = %addr, env = %state.config.env, "starting server");
    run_until(
        listener,
        app,
        state.background.clone(),
        shutdown_signal(),
        SHUTDOWN_GRACE,
    )
    .await?;
    info!(addr = %addr, "stopped server");
    Ok(())
}

/// Serves `app` until `shutdown` resolves, then stops accepting, gives open
/// connections `grace` to finish and waits for background tasks.
pub async fn run_until<F>(
    listener: TcpListener,
    app: Router,
    background: Background,
    shutdown: F,
    grace: Duration,
) -> anyhow::Result<()>
where
    F: Future<Output = &'static str>,
{
    let (stop_tx, stop_rx) = watch::channel(());
    let connections = Background::new();
    tokio::pin!(shutdown);

    let signal = loop {
        tokio::select! {
            signal = &mut shutdown => break signal,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => connections.spawn(
                    "connection",
                    conn::serve_connection(stream, peer, app.clone(), stop_rx.clone()),
                ),
                Err(e) => error!(error = %e, "accept failed"),
            },
        }
    };
    info!(signal, "shutting down server");
    drop(listener);

    let _ = stop_tx.send(());
    if tokio::time::timeout(grace, connections.wait()).await.is_err() {
        anyhow::bail!(
            "{} connections still open after {grace:?}",
            connections.running()
        );
    }

    info!(tasks = background.running(), "completing background tasks");
    background.wait().await;
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}
