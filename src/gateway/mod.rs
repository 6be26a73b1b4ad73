//! HTTP surface: router, middleware, handlers and server lifecycle

pub mod auth;
mod conn;
mod error;
mod handlers;
mod router;
mod server;

pub use conn::ConnectionLimits;
pub use error::{AUTH_CHALLENGE, ApiError, ErrorCode};
pub use router::{AppState, BODY_READ_TIMEOUT, REQUEST_TIMEOUT, create_router};
pub use server::{REGISTRY_RELOAD_INTERVAL, SHUTDOWN_GRACE, Server};
