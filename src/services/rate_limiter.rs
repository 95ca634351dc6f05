//! Per-client-IP admission control for the write endpoints.
//!
//! Each IP gets its own token bucket (burst `requests`, refilled at
//! `requests / window`). Buckets are created on first use and dropped one
//! window later by a one-shot eviction task, so idle clients cost nothing.
//!
//! Forwarded headers (`X-Forwarded-For`, `X-Real-IP`) are only honoured when
//! `trust_forwarded_headers` is set; otherwise the socket peer address is used.

use crate::{config::RateLimitConfig, errors::AppError};
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRef, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::{convert::Infallible, net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct IpRateLimiter {
    inner: Option<Arc<Inner>>,
    trust_forwarded_headers: bool,
}

struct Inner {
    buckets: DashMap<String, Arc<Bucket>>,
    quota: Quota,
    window: Duration,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let trust_forwarded_headers = config.trust_forwarded_headers;
        let disabled = Self {
            inner: None,
            trust_forwarded_headers,
        };
        if !config.enabled {
            tracing::info!("rate limiting disabled");
            return disabled;
        }
        let (Some(requests), false) = (NonZeroU32::new(config.requests), config.window.is_zero())
        else {
            tracing::warn!("rate limit needs positive requests and window, disabling");
            return disabled;
        };
        let period = config.window / requests.get();
        let Some(quota) = Quota::with_period(period.max(Duration::from_nanos(1))) else {
            return disabled;
        };

        Self {
            inner: Some(Arc::new(Inner {
                buckets: DashMap::new(),
                quota: quota.allow_burst(requests),
                window: config.window,
            })),
            trust_forwarded_headers,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn trusts_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers
    }

    /// Consume one token for `ip`. Never blocks.
    pub fn check(&self, ip: &str) -> bool {
        let Some(inner) = &self.inner else {
            return true;
        };

        let existing = inner.buckets.get(ip).map(|bucket| bucket.clone());
        let bucket = match existing {
            Some(bucket) => bucket,
            None => inner
                .buckets
                .entry(ip.to_string())
                .or_insert_with(|| {
                    schedule_eviction(inner.clone(), ip.to_string());
                    Arc::new(RateLimiter::direct(inner.quota))
                })
                .clone(),
        };

        bucket.check().is_ok()
    }

    /// Number of IPs currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.buckets.len())
    }
}

fn schedule_eviction(inner: Arc<Inner>, ip: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        tokio::time::sleep(inner.window).await;
        inner.buckets.remove(&ip);
        tracing::trace!(ip = %ip, "rate limit bucket evicted");
    });
}

/// Resolve the client address for a request.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            });
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Client address as the rate limiter sees it.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    IpRateLimiter: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let limiter = IpRateLimiter::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            limiter.trusts_forwarded_headers(),
        )))
    }
}

/// Axum middleware rejecting over-limit clients with 429.
pub async fn rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(req).await;
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer, limiter.trusts_forwarded_headers());

    if limiter.check(&ip) {
        next.run(req).await
    } else {
        tracing::info!(ip = %ip, path = %req.uri().path(), "rate limit exceeded");
        AppError::RateLimited.into_response()
    }
}
