//! Authentication and scope middleware
//!
//! Protected routes accept two bearer styles:
//! - Signed tokens issued by `POST /oauth/token` (always tried first)
//! - The legacy shared token, when legacy mode is enabled
//!
//! Authenticated requests carry their [`Claims`] in request extensions for
//! the scope guard and handlers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::router::AppState;
use crate::metrics::MetricsSink;
use crate::oauth::token::unix_now;
use crate::oauth::{Claims, SCOPE_FILES_WRITE, SCOPE_TASKS_WRITE, TokenError, scopes_satisfied};

/// Client id attached to requests authenticated with the legacy token
pub const LEGACY_CLIENT_ID: &str = "legacy";

/// Scopes granted to the legacy token
pub const LEGACY_SCOPES: [&str; 2] = [SCOPE_TASKS_WRITE, SCOPE_FILES_WRITE];

/// Extract the token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn legacy_claims(issuer: &str) -> Claims {
    let now = unix_now();
    Claims {
        iss: issuer.to_string(),
        sub: LEGACY_CLIENT_ID.to_string(),
        client_id: LEGACY_CLIENT_ID.to_string(),
        scopes: LEGACY_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        iat: now,
        exp: now.saturating_add(1),
        jti: Uuid::new_v4().simple().to_string(),
    }
}

fn matches_legacy(state: &AppState, token: &str) -> bool {
    state
        .legacy_token
        .as_deref()
        .is_some_and(|legacy| bool::from(token.as_bytes().ct_eq(legacy.as_bytes())))
}

/// Authentication middleware for protected routes
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(request.headers()) else {
        warn!(path = %path, "Missing or malformed Authorization header");
        state
            .metrics
            .incr_counter("auth_failures_total", &[("reason", "missing_token".to_string())]);
        return ApiError::authentication(
            "missing or malformed Authorization header, use: Authorization: Bearer <token>",
        )
        .into_response();
    };

    let claims = match state.tokens.validate(token) {
        Ok(claims) => {
            state
                .metrics
                .incr_counter("auth_success_total", &[("method", "oauth".to_string())]);
            claims
        }
        Err(err) if matches_legacy(&state, token) => {
            debug!(token_error = err.kind(), "Signed token rejected, legacy token accepted");
            state
                .metrics
                .incr_counter("auth_success_total", &[("method", "legacy".to_string())]);
            legacy_claims(state.tokens.issuer())
        }
        Err(err) => {
            warn!(path = %path, reason = err.kind(), "Invalid bearer token");
            state
                .metrics
                .incr_counter("auth_failures_total", &[("reason", err.kind().to_string())]);
            let message = match err {
                TokenError::Expired => "token expired",
                _ => "invalid token",
            };
            return ApiError::authentication(message).into_response();
        }
    };

    debug!(client_id = %claims.client_id, path = %path, "Authenticated request");
    request.extensions_mut().insert(claims);
    next.run(request).await
}

/// Per-route scope requirement
#[derive(Clone)]
pub struct ScopeGuard {
    required: &'static [&'static str],
    metrics: Arc<dyn MetricsSink>,
}

impl ScopeGuard {
    /// Guard requiring every scope in `required`
    pub fn new(required: &'static [&'static str], metrics: Arc<dyn MetricsSink>) -> Self {
        Self { required, metrics }
    }
}

/// Scope guard middleware; must run after [`authenticate`]
pub async fn require_scopes(
    State(guard): State<ScopeGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(claims) = request.extensions().get::<Claims>() else {
        return ApiError::authentication("authentication required").into_response();
    };

    if !scopes_satisfied(&claims.scopes, guard.required) {
        let required = guard.required.join(",");
        warn!(
            client_id = %claims.client_id,
            required = %required,
            granted = ?claims.scopes,
            "Insufficient scope"
        );
        guard.metrics.incr_counter(
            "scope_failures_total",
            &[
                ("client_id", claims.client_id.clone()),
                ("required", required),
            ],
        );
        return ApiError::authorization(format!(
            "insufficient scope, requires: {}",
            guard.required.join(" ")
        ))
        .into_response();
    }

    next.run(request).await
}
