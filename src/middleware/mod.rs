//! Request pipeline.
//!
//! [`PIPELINE`] lists the stages outermost first. [`compose`] folds them
//! around the routed application; a stage whose feature is switched off in
//! config leaves the router untouched.

pub mod authenticate;
pub mod cors;
pub mod deadline;
pub mod rate_limit;
pub mod recover;
pub mod require;

use std::{sync::Arc, time::Duration};

use axum::{
    http::{Request, Response},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::RequestBodyTimeoutLayer,
    trace::TraceLayer,
};
use tracing::Span;

use crate::{metrics, state::AppState};

/// Time allowed to receive a request body.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed to produce a response.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Trace,
    Metrics,
    RecoverPanic,
    Cors,
    RateLimit,
    Authenticate,
    Deadline,
}

pub const PIPELINE: [Stage; 7] = [
    Stage::Trace,
    Stage::Metrics,
    Stage::RecoverPanic,
    Stage::Cors,
    Stage::RateLimit,
    Stage::Authenticate,
    Stage::Deadline,
];

/// Wraps `router` so that `stages[0]` sees each request first.
pub fn compose(stages: &[Stage], state: &AppState, router: Router) -> Router {
    stages
        .iter()
        .rev()
        .fold(router, |inner, stage| stage.wrap(inner, state))
}

impl Stage {
    fn wrap(self, inner: Router, state: &AppState) -> Router {
        let config = &state.config;
        match self {
            Stage::Trace => inner.layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request<_>| {
                        tracing::info_span!(
                            "http_request",
                            method = %req.method(),
                            uri = %req.uri()
                        )
                    })
                    .on_response(|res: &Response<_>, latency: Duration, _span: &Span| {
                        let status = res.status();
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    }),
            ),
            Stage::Metrics if config.metrics => {
                inner.layer(from_fn_with_state(state.metrics.clone(), metrics::track))
            }
            Stage::RecoverPanic => inner.layer(CatchPanicLayer::custom(recover::handle_panic)),
            Stage::Cors if !config.cors.trusted_origins.is_empty() => inner.layer(
                from_fn_with_state(Arc::new(config.cors.trusted_origins.clone()), cors::enable_cors),
            ),
            Stage::RateLimit if config.limiter.enabled => {
                inner.layer(from_fn_with_state(state.limiter.clone(), rate_limit::limit))
            }
            Stage::Authenticate => inner.layer(from_fn_with_state(
                state.models.users.clone(),
                authenticate::authenticate,
            )),
            Stage::Deadline => inner
                .layer(from_fn(deadline::deadline))
                .layer(RequestBodyTimeoutLayer::new(READ_TIMEOUT)),
            Stage::Metrics | Stage::Cors | Stage::RateLimit => inner,
        }
    }
}
