//! HTTP error envelope
//!
//! Every error response has the shape
//! `{"status":"error","message":"...","code":"..."}`. Token endpoint
//! failures additionally carry the OAuth error name as `error`.

use std::fmt;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::files::WriteError;

/// `WWW-Authenticate` challenge sent with every 401
pub const AUTH_CHALLENGE: &str = "Bearer realm=\"omnidrop\"";

/// Typed error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bad JSON, missing fields, invalid path
    ValidationError,
    /// Missing, invalid or expired credentials
    AuthenticationError,
    /// Insufficient scopes
    AuthorizationError,
    /// Unknown route
    NotFound,
    /// Known route, wrong method
    MethodNotAllowed,
    /// Exclusive create lost to a concurrent writer
    AlreadyExists,
    /// Reserved
    RateLimitExceeded,
    /// Task bridge failure
    ApplescriptError,
    /// Filesystem failure after validation
    FilesystemError,
    /// Unexpected fault
    InternalError,
    /// Request exceeded the router deadline
    TimeoutError,
}

impl ErrorCode {
    /// HTTP status for this code
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::AuthenticationError => StatusCode::UNAUTHORIZED,
            Self::AuthorizationError => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ApplescriptError | Self::FilesystemError | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::AuthenticationError => "authentication_error",
            Self::AuthorizationError => "authorization_error",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::AlreadyExists => "already_exists",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ApplescriptError => "applescript_error",
            Self::FilesystemError => "filesystem_error",
            Self::InternalError => "internal_error",
            Self::TimeoutError => "timeout_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by handlers and middleware
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    oauth_error: Option<&'static str>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    status: &'static str,
    message: &'a str,
    code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

impl ApiError {
    /// Error with an explicit code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            oauth_error: None,
        }
    }

    /// 400 `validation_error`
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// 401 `authentication_error`
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationError, message)
    }

    /// 403 `authorization_error`
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthorizationError, message)
    }

    /// 500 `internal_error`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Attach an OAuth error name (`invalid_client`, ...)
    #[must_use]
    pub fn with_oauth_error(mut self, error: &'static str) -> Self {
        self.oauth_error = Some(error);
        self
    }

    /// Error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: "error",
            message: &self.message,
            code: self.code,
            error: self.oauth_error,
        };
        let mut response = (self.code.status(), Json(body)).into_response();

        if self.code == ErrorCode::AuthenticationError {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(AUTH_CHALLENGE),
            );
        }
        response
    }
}

impl From<WriteError> for ApiError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::InvalidPath(_) => Self::validation(err.to_string()),
            WriteError::AlreadyExists { race: false } => Self::validation(err.to_string()),
            WriteError::AlreadyExists { race: true } => {
                Self::new(ErrorCode::AlreadyExists, err.to_string())
            }
            WriteError::Io { op, .. } => {
                Self::new(ErrorCode::FilesystemError, format!("failed to {op} file"))
            }
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let message = match &err {
            BridgeError::Spawn(_) => "failed to start task bridge".to_string(),
            BridgeError::Timeout(_) | BridgeError::Exited { .. } | BridgeError::Rejected(_) => {
                format!("task creation failed: {err}")
            }
        };
        Self::new(ErrorCode::ApplescriptError, message)
    }
}
