//! Request handlers

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::error::{ApiError, ErrorCode};
use super::router::AppState;
use crate::bridge::TaskRequest;
use crate::files::{FileRequest, WriteError};
use crate::oauth::Claims;

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid JSON body: {e}")))
}

/// `POST /tasks`
pub(super) async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let task: TaskRequest = parse_json(&body)?;
    if task.title.is_empty() {
        return Err(ApiError::validation("title is required"));
    }

    let started = Instant::now();
    let result = state.bridge.create_task(&task).await;
    state.metrics.observe_histogram(
        "task_bridge_duration_seconds",
        &[],
        started.elapsed().as_secs_f64(),
    );

    match result {
        Ok(output) => {
            state.metrics.incr_counter("tasks_created_total", &[]);
            info!(
                client_id = %claims.client_id,
                title = %task.title,
                project = %task.project,
                output = %output,
                "Task created"
            );
            Ok(Json(json!({"status": "ok", "created": true})))
        }
        Err(err) => {
            state
                .metrics
                .incr_counter("task_failures_total", &[("kind", err.kind().to_string())]);
            error!(
                client_id = %claims.client_id,
                title = %task.title,
                error = %err,
                backtrace = %Backtrace::capture(),
                "Task creation failed"
            );
            Err(err.into())
        }
    }
}

/// `POST /files`
pub(super) async fn create_file(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: FileRequest = parse_json(&body)?;
    if request.filename.is_empty() {
        return Err(ApiError::validation("filename is required"));
    }
    if request.content.is_empty() {
        return Err(ApiError::validation("content is required"));
    }

    let directory = request.directory.as_deref().filter(|d| !d.is_empty());
    match state
        .files
        .write(directory, &request.filename, request.content.as_bytes())
        .await
    {
        Ok(path) => {
            state.metrics.incr_counter("files_written_total", &[]);
            info!(
                client_id = %claims.client_id,
                path = %path,
                bytes = request.content.len(),
                "File written"
            );
            Ok(Json(json!({"status": "ok", "created": true, "path": path})))
        }
        Err(err) => {
            state
                .metrics
                .incr_counter("file_failures_total", &[("kind", err.kind().to_string())]);
            match &err {
                WriteError::Io { .. } => error!(
                    client_id = %claims.client_id,
                    filename = %request.filename,
                    error = %err,
                    backtrace = %Backtrace::capture(),
                    "File write failed"
                ),
                _ => warn!(
                    client_id = %claims.client_id,
                    filename = %request.filename,
                    directory = ?request.directory,
                    error = %err,
                    "File write rejected"
                ),
            }
            Err(err.into())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    grant_type: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

fn token_failure(state: &AppState, err: ApiError, oauth_error: &'static str) -> ApiError {
    state.metrics.incr_counter(
        "token_requests_failed_total",
        &[("error", oauth_error.to_string())],
    );
    err.with_oauth_error(oauth_error)
}

/// `POST /oauth/token` (client credentials grant)
pub(super) async fn issue_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let request: TokenRequest = if is_json {
        serde_json::from_slice::<TokenRequest>(&body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes::<TokenRequest>(&body).map_err(|e| e.to_string())
    }
    .map_err(|e| {
        token_failure(
            &state,
            ApiError::validation(format!("malformed token request: {e}")),
            "invalid_request",
        )
    })?;

    if request.grant_type != "client_credentials" {
        return Err(token_failure(
            &state,
            ApiError::validation("grant_type must be client_credentials"),
            "unsupported_grant_type",
        ));
    }
    if request.client_id.is_empty() || request.client_secret.is_empty() {
        return Err(token_failure(
            &state,
            ApiError::validation("client_id and client_secret are required"),
            "invalid_request",
        ));
    }

    let registry = Arc::clone(&state.registry);
    let client_id = request.client_id.clone();
    let secret = request.client_secret;
    let outcome = tokio::task::spawn_blocking(move || {
        if let Err(e) = registry.reload() {
            warn!(error = %e, "Client registry reload failed, keeping previous snapshot");
        }
        registry.authenticate(&client_id, &secret)
    })
    .await
    .map_err(|e| ApiError::internal(format!("authentication task failed: {e}")))?;

    let client = outcome.map_err(|e| {
        warn!(client_id = %request.client_id, reason = e.kind(), "Client authentication failed");
        token_failure(
            &state,
            ApiError::authentication("invalid client credentials"),
            "invalid_client",
        )
    })?;

    let access_token = state.tokens.issue(&client, state.token_ttl).map_err(|e| {
        error!(client_id = %client.client_id, error = %e, "Token signing failed");
        ApiError::internal("failed to issue token")
    })?;

    state.metrics.incr_counter(
        "tokens_issued_total",
        &[("client_id", client.client_id.clone())],
    );
    info!(client_id = %client.client_id, scopes = ?client.scopes, "Issued access token");

    let body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": state.token_ttl.as_secs().max(1),
        "scope": client.scopes.join(" "),
    });
    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(body),
    )
        .into_response())
}

/// `GET /health`
pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics`
pub(super) async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        state.metrics.render(),
    )
}

pub(super) async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        ErrorCode::NotFound,
        format!("no route for {method} {}", uri.path()),
    )
}

pub(super) async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        ErrorCode::MethodNotAllowed,
        format!("method {method} not allowed on {}", uri.path()),
    )
}
