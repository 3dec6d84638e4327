use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{app::VERSION, error::respond, state::AppState};

/// Process-wide request counters.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub in_flight: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> Snapshot {
        let sent = self.responses_sent.load(Ordering::Acquire);
        let received = self.requests_received.load(Ordering::Acquire);
        Snapshot {
            total_requests_received: received,
            total_responses_sent: sent,
            total_processing_time_us: self.processing_time_us.load(Ordering::Acquire),
            in_flight: received.saturating_sub(sent),
        }
    }
}

pub async fn track(State(metrics): State<Arc<Metrics>>, req: Request, next: Next) -> Response {
    metrics.requests_received.fetch_add(1, Ordering::AcqRel);
    let _in_flight = InFlight {
        metrics,
        start: Instant::now(),
    };
    next.run(req).await
}

/// Settles one received request, even when the request future is dropped
/// before a response is produced.
struct InFlight {
    metrics: Arc<Metrics>,
    start: Instant,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let elapsed = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.metrics.processing_time_us.fetch_add(elapsed, Ordering::AcqRel);
        self.metrics.responses_sent.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Serialize)]
struct DebugVars {
    version: &'static str,
    timestamp: i64,
    #[serde(flatten)]
    requests: Snapshot,
    runtime_workers: usize,
    background_tasks: usize,
    rate_limited_clients: usize,
    database: DatabaseStats,
}

#[derive(Serialize)]
struct DatabaseStats {
    open_connections: u32,
    idle: usize,
    in_use: usize,
    max_open_conns: u32,
    max_idle_conns: u32,
}

/// `GET /debug/vars`
pub async fn debug_vars(State(state): State<AppState>) -> Response {
    let open = state.db.size();
    let idle = state.db.num_idle();
    let vars = DebugVars {
        version: VERSION,
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        requests: state.metrics.snapshot(),
        runtime_workers: tokio::runtime::Handle::current().metrics().num_workers(),
        background_tasks: state.background.running(),
        rate_limited_clients: state.limiter.tracked(),
        database: DatabaseStats {
            open_connections: open,
            idle,
            in_use: (open as usize).saturating_sub(idle),
            max_open_conns: state.config.db.max_open_conns,
            max_idle_conns: state.config.db.max_idle_conns,
        },
    };
    respond(StatusCode::OK, vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_derives_in_flight() {
        let metrics = Metrics::default();
        metrics.requests_received.store(5, Ordering::SeqCst);
        metrics.responses_sent.store(3, Ordering::SeqCst);
        let snap = metrics.snapshot();
        assert_eq!(snap.in_flight, 2);
        assert_eq!(snap.total_requests_received, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_request_is_not_left_in_flight() {
        use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
        use std::time::Duration;
        use tower::ServiceExt;

        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(120)).await;
            "done"
        }

        let metrics = Arc::new(Metrics::default());
        let app = Router::new()
            .route("/slow", get(slow))
            .layer(from_fn_with_state(metrics.clone(), track));

        let req = axum::http::Request::get("/slow").body(Body::empty()).unwrap();
        let abandoned = tokio::time::timeout(Duration::from_secs(1), app.oneshot(req)).await;
        assert!(abandoned.is_err());

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests_received, 1);
        assert_eq!(snap.total_responses_sent, 1);
        assert_eq!(snap.in_flight, 0);
    }
}
