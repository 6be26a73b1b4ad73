//! HTTP router and shared state

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::{CatchPanicLayer, ResponseForPanic},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::RequestBodyTimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info_span};

use super::auth::{ScopeGuard, authenticate, require_scopes};
use super::error::{ApiError, ErrorCode};
use super::handlers;
use crate::bridge::{ScriptBridge, TaskBridge};
use crate::config::Config;
use crate::files::FileWriter;
use crate::metrics::MetricsSink;
use crate::oauth::{ClientRegistry, SCOPE_FILES_WRITE, SCOPE_TASKS_WRITE, TokenManager};
use crate::Result;

/// Logical deadline for a whole request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for reading a request body
pub const BODY_READ_TIMEOUT: Duration = Duration::from_secs(15);

const REQUEST_ID_HEADER: &str = "x-request-id";

static TASKS_SCOPES: [&str; 1] = [SCOPE_TASKS_WRITE];
static FILES_SCOPES: [&str; 1] = [SCOPE_FILES_WRITE];

/// Shared application state
pub struct AppState {
    /// OAuth client registry
    pub registry: Arc<ClientRegistry>,
    /// Token issuer/validator
    pub tokens: Arc<TokenManager>,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
    /// Legacy shared token; `Some` only when legacy mode is enabled
    pub legacy_token: Option<String>,
    /// Task bridge
    pub bridge: Arc<dyn TaskBridge>,
    /// Confined file writer
    pub files: FileWriter,
    /// Metrics sink
    pub metrics: Arc<dyn MetricsSink>,
}

impl AppState {
    /// Wire production collaborators from configuration
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let registry = ClientRegistry::load(&config.oauth_clients_file)?;
        let tokens = TokenManager::new(config.jwt_secret.as_bytes(), config.token_issuer.as_str());

        Ok(Self {
            registry: Arc::new(registry),
            tokens: Arc::new(tokens),
            token_ttl: config.token_expiry,
            legacy_token: if config.legacy_auth_enabled {
                config.legacy_token.clone()
            } else {
                None
            },
            bridge: Arc::new(ScriptBridge::new(&config.script_path)),
            files: FileWriter::new(&config.files_dir),
            metrics,
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let metrics = Arc::clone(&state.metrics);
    let tasks_guard = ScopeGuard::new(&TASKS_SCOPES, Arc::clone(&metrics));
    let files_guard = ScopeGuard::new(&FILES_SCOPES, Arc::clone(&metrics));

    let protected = Router::new()
        .route(
            "/tasks",
            post(handlers::create_task)
                .route_layer(middleware::from_fn_with_state(tasks_guard, require_scopes)),
        )
        .route(
            "/files",
            post(handlers::create_file)
                .route_layer(middleware::from_fn_with_state(files_guard, require_scopes)),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ));

    let public = Router::new()
        .route("/oauth/token", post(handlers::issue_token))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    Router::new()
        .merge(public)
        .merge(protected)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(middleware::from_fn_with_state(
                    Arc::clone(&metrics),
                    track_requests,
                ))
                .layer(CatchPanicLayer::custom(PanicResponder { metrics }))
                .layer(middleware::from_fn(request_deadline))
                .layer(RequestBodyTimeoutLayer::new(BODY_READ_TIMEOUT)),
        )
        .with_state(state)
}

/// Count requests and record latency per matched route
async fn track_requests(
    State(metrics): State<Arc<dyn MetricsSink>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics.incr_counter(
        "http_requests_total",
        &[
            ("method", method.clone()),
            ("route", route.clone()),
            ("status", status),
        ],
    );
    metrics.observe_histogram(
        "http_request_duration_seconds",
        &[("method", method), ("route", route)],
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Cap the whole request at [`REQUEST_TIMEOUT`]
async fn request_deadline(request: Request<Body>, next: Next) -> Response {
    match tokio::time::timeout(REQUEST_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::new(
            ErrorCode::TimeoutError,
            format!("request exceeded {}s deadline", REQUEST_TIMEOUT.as_secs()),
        )
        .into_response(),
    }
}

/// Converts handler panics into `internal_error` envelopes
#[derive(Clone)]
struct PanicResponder {
    metrics: Arc<dyn MetricsSink>,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> Response<Body> {
        let detail = err
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| err.downcast_ref::<&str>().copied())
            .unwrap_or("<non-string panic payload>");
        error!(
            panic = %detail,
            backtrace = %Backtrace::force_capture(),
            "Handler panicked"
        );
        self.metrics.incr_counter("panics_total", &[]);
        ApiError::internal("internal server error").into_response()
    }
}
