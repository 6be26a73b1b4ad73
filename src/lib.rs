//! Omnidrop
//!
//! Authenticated local HTTP service that turns requests into side effects on
//! the host: task creation through an external bridge script, and confined
//! file writes under a single base directory.
//!
//! # Features
//!
//! - **OAuth 2.0 client credentials**: HS256 signed bearer tokens, bcrypt
//!   hashed client secrets, hot-reloaded YAML client registry
//! - **Scopes**: `resource:action` with `prefix:*` and `*` wildcards
//! - **Legacy token**: optional shared bearer token as a fallback
//! - **Path safety**: syntactic rejection plus canonical prefix check,
//!   exclusive create
//! - **Operations**: Prometheus metrics, request ids, panic recovery,
//!   graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod gateway;
pub mod metrics;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG`, when set, overrides `level`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
