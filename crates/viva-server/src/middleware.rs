//! Authentication and rate-limit middleware.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{auth, AppState};

/// The authenticated caller, stored in request extensions.
#[derive(Clone, Debug)]
pub struct IdentityContext {
    pub user_id: String,
}

/// Middleware that authenticates requests via `Authorization: Bearer <token>`.
///
/// On success the user's ledger row is provisioned if absent (the identity
/// provider owns credentials; this server only owns counters) and an
/// [`IdentityContext`] is inserted for downstream handlers.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let user_id = auth::verify_token(&token, &state.token_secret)?;

    // Provision the ledger row on first contact (blocking DB operation).
    let provision_user = user_id.clone();
    tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        viva_session::ensure_user(&conn, &provision_user, chrono::Utc::now())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    req.extensions_mut().insert(IdentityContext { user_id });

    Ok(next.run(req).await)
}

/// Rate limiting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Rate limit by IP address (unauthenticated paths).
    Ip(IpAddr),
    /// Rate limit by authenticated user id.
    User(String),
}

/// In-memory rate limiter state.
///
/// Uses a simple fixed window counter. Process-local: a horizontally scaled
/// deployment would need a shared store instead.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<RateLimitKey, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if the request is allowed.
    ///
    /// Returns `true` if allowed, `false` if limit exceeded.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Refusing all requests over a poisoned counter would be a
                // self-inflicted denial of service; a stale counter is the
                // lesser harm.
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();

        // Evict only expired windows so active limits survive the cleanup.
        if state.len() > 10_000 {
            state.retain(|_, (_, start)| now.duration_since(*start) <= Duration::from_secs(60));
        }

        let (count, start) = state.entry(key).or_insert((0, now));

        if now.duration_since(*start) > Duration::from_secs(60) {
            *count = 1;
            *start = now;
            true
        } else {
            *count += 1;
            *count <= limit
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiting middleware. Keys by authenticated user when available,
/// falling back to the client IP. Session starts get the stricter limit.
pub async fn rate_limit_middleware(
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let key = if let Some(identity) = req.extensions().get::<IdentityContext>() {
        RateLimitKey::User(identity.user_id.clone())
    } else if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        RateLimitKey::Ip(addr.ip())
    } else {
        // Neither identity nor connection info: misconfigured stack.
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let limit = if req.uri().path() == "/api/session/start" {
        state.start_rate_limit_per_min
    } else {
        state.rate_limit_per_min
    };

    if !state.rate_limiter.check(key, limit) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderValue::from_static("60"),
        );
        return Ok(response);
    }

    Ok(next.run(req).await)
}
