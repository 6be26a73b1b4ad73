//! OAuth 2.0 client-credentials support
//!
//! - [`registry`]: on-disk client registry with mtime-based hot reload
//! - [`token`]: HS256 signed bearer token issuance and validation
//! - [`scope`]: `resource:action` scope matching with wildcards

pub mod registry;
pub mod scope;
pub mod token;

pub use registry::{AuthenticateError, ClientRegistry, OAuthClient};
pub use scope::{scope_matches, scopes_satisfied};
pub use token::{Claims, TokenError, TokenManager};

/// Scope required by `POST /tasks`
pub const SCOPE_TASKS_WRITE: &str = "tasks:write";

/// Scope required by `POST /files`
pub const SCOPE_FILES_WRITE: &str = "files:write";
