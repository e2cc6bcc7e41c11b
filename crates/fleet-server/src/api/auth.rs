//! Authentication/authorization middleware and the admin login route.
//!
//! Principal authentication plus a per-route-tier permission check against
//! the pluggable [`crate::auth::AuthService`] collaborator.

use crate::auth::Action as AuthAction;
use crate::services::Services;
use dashmap::DashMap;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::{ErrorCode, FleetError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn auth_failure(err: FleetError) -> Response {
    let status = if err.code == ErrorCode::Unauthorized {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(serde_json::json!({"error": err.user_message, "code": err.code}))).into_response()
}

async fn require(services: &Arc<Services>, request: &Request, action: AuthAction) -> Result<(), Response> {
    let Some(token) = bearer_token(request) else {
        return Err(auth_failure(FleetError::new(
            ErrorCode::Unauthorized,
            "missing Authorization header",
        )));
    };
    let principal = services.auth.authenticate(token).map_err(auth_failure)?;
    if !services.auth.authorize(&principal, action) {
        return Err(auth_failure(FleetError::new(
            ErrorCode::Unauthorized,
            format!("principal {} lacks permission for this action", principal.subject),
        )));
    }
    Ok(())
}

/// Gates read-only routes (status, sensors, detection listings).
pub async fn require_read(State(services): State<Arc<Services>>, request: Request, next: Next) -> Response {
    match require(&services, &request, AuthAction::Read).await {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Gates anything that moves a drone or changes its mode.
pub async fn require_flight_control(State(services): State<Arc<Services>>, request: Request, next: Next) -> Response {
    match require(&services, &request, AuthAction::FlightControl).await {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Gates fleet-wide administrative routes (auto-scan control, reset).
pub async fn require_admin(State(services): State<Arc<Services>>, request: Request, next: Next) -> Response {
    match require(&services, &request, AuthAction::Admin).await {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// `POST /auth/login` — exchanges the bootstrap admin credential for a
/// signed token. The only route in the REST surface with no auth layer.
pub async fn login(
    State(services): State<Arc<Services>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, super::routes::ApiError> {
    let token = services.auth.issue_token(&req.username, &req.password)?;
    Ok(Json(LoginResponse { token }))
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    window_start_epoch_s: u64,
    window_count: u32,
    last_seen_epoch_s: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<DashMap<String, RateLimitEntry>>,
    last_cleanup_epoch_s: Arc<AtomicU64>,
    cleanup_interval: Duration,
    entry_ttl: Duration,
    max_tracked_ips: usize,
    max_rps: u32,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(max_rps: u32, enabled: bool) -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
            last_cleanup_epoch_s: Arc::new(AtomicU64::new(0)),
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300),
            max_tracked_ips: 10_000,
            max_rps,
            enabled,
        }
    }

    /// Check if request should be allowed. Returns true if allowed.
    pub fn check(&self, ip: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now_epoch_s = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(value) => value.as_secs(),
            Err(_) => 0,
        };

        self.maybe_cleanup(now_epoch_s);

        if !self.ensure_capacity(ip, now_epoch_s) {
            return false;
        }

        let mut entry = self
            .requests
            .entry(ip.to_string())
            .or_insert(RateLimitEntry {
                window_start_epoch_s: now_epoch_s,
                window_count: 0,
                last_seen_epoch_s: now_epoch_s,
            });

        let state = entry.value_mut();
        if state.window_start_epoch_s != now_epoch_s {
            state.window_start_epoch_s = now_epoch_s;
            state.window_count = 0;
        }
        state.window_count = state.window_count.saturating_add(1);
        state.last_seen_epoch_s = now_epoch_s;

        state.window_count <= self.max_rps
    }

    fn maybe_cleanup(&self, now_epoch_s: u64) {
        if now_epoch_s == 0 {
            return;
        }
        let last_cleanup = self.last_cleanup_epoch_s.load(Ordering::Relaxed);
        if last_cleanup != 0
            && now_epoch_s.saturating_sub(last_cleanup) < self.cleanup_interval.as_secs()
        {
            return;
        }

        if self
            .last_cleanup_epoch_s
            .compare_exchange(last_cleanup, now_epoch_s, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        self.purge_stale_entries(now_epoch_s);
    }

    fn ensure_capacity(&self, ip: &str, now_epoch_s: u64) -> bool {
        if self.max_tracked_ips == 0 {
            return true;
        }
        if self.requests.contains_key(ip) {
            return true;
        }
        if self.requests.len() < self.max_tracked_ips {
            return true;
        }

        self.purge_stale_entries(now_epoch_s);

        if self.requests.contains_key(ip) {
            return true;
        }

        self.requests.len() < self.max_tracked_ips
    }

    fn purge_stale_entries(&self, now_epoch_s: u64) {
        if now_epoch_s == 0 {
            return;
        }
        let ttl = self.entry_ttl.as_secs();
        if ttl == 0 {
            return;
        }

        let stale: Vec<String> = self
            .requests
            .iter()
            .filter(|entry| now_epoch_s.saturating_sub(entry.value().last_seen_epoch_s) >= ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale {
            self.requests.remove(&key);
        }
    }
}

/// Rate limiting middleware, applied ahead of auth so an unauthenticated
/// flood can't cheaply burn the JWT decode path either.
pub async fn rate_limit(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if limiter.check(&ip) {
        next.run(request).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "rate limit exceeded", "retry_after_secs": 1})),
        )
            .into_response()
    }
}
