//! Per-client token bucket keyed by the peer IP address.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{config::LimiterConfig, error::AppError};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Clients unseen for longer than this are forgotten by the sweeper.
pub const IDLE_TTL: Duration = Duration::from_secs(3 * 60);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    burst: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            tokens: burst as f64,
            burst: burst as f64,
            rate,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Client {
    bucket: TokenBucket,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rps: f64,
    burst: u32,
    clients: Mutex<HashMap<IpAddr, Client>>,
}

impl RateLimiter {
    pub fn new(cfg: &LimiterConfig) -> Self {
        Self {
            rps: cfg.rps,
            burst: cfg.burst,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut clients = self.clients.lock();
        let client = clients.entry(ip).or_insert_with(|| Client {
            bucket: TokenBucket::new(self.rps, self.burst, now),
            last_seen: now,
        });
        client.last_seen = now;
        client.bucket.try_acquire(now)
    }

    /// Drops clients idle for longer than `ttl`; returns how many went.
    pub fn evict_idle(&self, now: Instant, ttl: Duration) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, c| now.saturating_duration_since(c.last_seen) <= ttl);
        before - clients.len()
    }

    pub fn tracked(&self) -> usize {
        self.clients.lock().len()
    }

    /// Periodically evicts idle clients. The task ends once the limiter is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.evict_idle(Instant::now(), IDLE_TTL);
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked(), "rate limiter sweep");
                }
            }
        })
    }
}

pub async fn limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied() else {
        return AppError::ServerError(anyhow::anyhow!("unable to determine client address"))
            .into_response();
    };
    if !limiter.allow(addr.ip()) {
        return AppError::RateLimited.into_response();
    }
    next.run(req).await
}
