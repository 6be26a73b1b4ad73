//! OAuth client registry
//!
//! The registry file is the source of truth. It is read into an in-memory map
//! at startup and re-read whenever its modification time changes; the map is
//! swapped atomically under a write lock, so readers always see either the
//! old or the new snapshot.
//!
//! ```yaml
//! clients:
//!   - client_id: svc-a
//!     client_secret_hash: "$2b$12$..."
//!     name: Keyboard launcher
//!     scopes: [tasks:write]
//!     created_at: 2025-01-01T00:00:00Z
//!     disabled: false
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Verified when the client id is unknown, so lookups cost the same either way.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    bcrypt::hash("omnidrop-unknown-client", bcrypt::DEFAULT_COST).unwrap_or_default()
});

/// A registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthClient {
    /// Unique client identifier
    pub client_id: String,
    /// bcrypt hash of the client secret
    pub client_secret_hash: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Scopes granted to tokens issued for this client
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Disabled clients never authenticate
    #[serde(default)]
    pub disabled: bool,
}

/// On-disk registry document
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    clients: Vec<OAuthClient>,
}

/// Credential check failures
#[derive(Debug, Error)]
pub enum AuthenticateError {
    /// No client with this id
    #[error("client not found")]
    NotFound,
    /// Client exists but is disabled
    #[error("client is disabled")]
    Disabled,
    /// Secret does not match
    #[error("invalid client credentials")]
    InvalidCredentials,
    /// Stored hash could not be checked
    #[error("secret verification failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl AuthenticateError {
    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Disabled => "disabled",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Hash(_) => "hash_error",
        }
    }
}

struct Snapshot {
    clients: Arc<HashMap<String, OAuthClient>>,
    modified: Option<SystemTime>,
}

/// In-memory view of the client registry file
pub struct ClientRegistry {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl ClientRegistry {
    /// Load the registry, creating an empty `0600` file if none exists
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            create_empty_registry(&path)?;
            info!(path = %path.display(), "Created empty OAuth client registry");
        }

        let (clients, modified) = read_registry(&path)?;
        info!(path = %path.display(), clients = clients.len(), "Loaded OAuth client registry");

        Ok(Self {
            path,
            snapshot: RwLock::new(Snapshot {
                clients: Arc::new(clients),
                modified,
            }),
        })
    }

    /// Registry file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if its modification time changed.
    ///
    /// Returns `true` when a new snapshot was swapped in. A file that fails to
    /// parse leaves the current snapshot in place.
    pub fn reload(&self) -> Result<bool> {
        let current = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if current == self.snapshot.read().modified {
            return Ok(false);
        }

        let (clients, modified) = read_registry(&self.path)?;
        let count = clients.len();
        {
            let mut snapshot = self.snapshot.write();
            snapshot.clients = Arc::new(clients);
            snapshot.modified = modified;
        }
        info!(path = %self.path.display(), clients = count, "Reloaded OAuth client registry");
        Ok(true)
    }

    /// Look up a client by id (disabled clients included)
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<OAuthClient> {
        self.snapshot.read().clients.get(client_id).cloned()
    }

    /// Enabled clients, ordered by id
    #[must_use]
    pub fn list(&self) -> Vec<OAuthClient> {
        let clients = Arc::clone(&self.snapshot.read().clients);
        let mut enabled: Vec<OAuthClient> =
            clients.values().filter(|c| !c.disabled).cloned().collect();
        enabled.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        enabled
    }

    /// Verify a client's secret.
    ///
    /// Blocking: bcrypt verification is deliberately slow. Call from
    /// `spawn_blocking` in async contexts.
    pub fn authenticate(
        &self,
        client_id: &str,
        secret: &str,
    ) -> std::result::Result<OAuthClient, AuthenticateError> {
        let Some(client) = self.get(client_id) else {
            let _ = bcrypt::verify(secret, &DUMMY_HASH);
            debug!(client_id = %client_id, "Unknown OAuth client");
            return Err(AuthenticateError::NotFound);
        };

        if client.disabled {
            let _ = bcrypt::verify(secret, &DUMMY_HASH);
            return Err(AuthenticateError::Disabled);
        }

        if bcrypt::verify(secret, &client.client_secret_hash)? {
            Ok(client)
        } else {
            Err(AuthenticateError::InvalidCredentials)
        }
    }
}

fn read_registry(path: &Path) -> Result<(HashMap<String, OAuthClient>, Option<SystemTime>)> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let content = fs::read_to_string(path)?;

    let file: RegistryFile = if content.trim().is_empty() {
        RegistryFile::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| Error::Registry {
            path: path.to_path_buf(),
            source,
        })?
    };

    let mut clients = HashMap::with_capacity(file.clients.len());
    for client in file.clients {
        if clients.contains_key(&client.client_id) {
            warn!(client_id = %client.client_id, "Duplicate client_id in registry, keeping first entry");
            continue;
        }
        clients.insert(client.client_id.clone(), client);
    }

    Ok((clients, modified))
}

fn create_empty_registry(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let content = serde_yaml::to_string(&RegistryFile::default())
        .map_err(|e| Error::Internal(format!("Failed to serialize empty registry: {e}")))?;
    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
