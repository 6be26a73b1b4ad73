//! Configuration management
//!
//! Configuration is read once at startup from environment variables (after
//! the optional `.env` file has been loaded into the process environment).
//! Every guard below is fatal: a misconfigured instance never starts.

use std::{
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::warn;

use crate::{Error, Result};

/// Port reserved for the production instance
pub const PRODUCTION_PORT: u16 = 8787;

/// Port range allowed for the `test` environment
pub const TEST_PORT_RANGE: std::ops::RangeInclusive<u16> = 8788..=8799;

/// Minimum signing secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Issuer embedded in (and required of) every signed token
pub const TOKEN_ISSUER: &str = "omnidrop";

const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
const EPHEMERAL_SECRET_LEN: usize = 48;
const CLIENTS_FILE_NAME: &str = "oauth-clients.yaml";

/// Deployment environment label (`OMNIDROP_ENV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// `production`
    Production,
    /// `development`
    Development,
    /// `test`
    Test,
    /// Variable not set
    Unset,
}

impl Environment {
    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Unset),
            Some("production") => Ok(Self::Production),
            Some("development") => Ok(Self::Development),
            Some("test") => Ok(Self::Test),
            Some(other) => Err(Error::Config(format!(
                "OMNIDROP_ENV must be production, development or test (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
            Self::Unset => "unset",
        };
        f.write_str(label)
    }
}

/// Process-wide configuration
#[derive(Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Listening port
    pub port: u16,
    /// Environment label
    pub environment: Environment,
    /// Whether the legacy bearer token is accepted
    pub legacy_auth_enabled: bool,
    /// Legacy bearer token (`TOKEN`)
    pub legacy_token: Option<String>,
    /// HMAC signing secret for issued tokens
    pub jwt_secret: String,
    /// Issuer claim for issued tokens
    pub token_issuer: String,
    /// Lifetime of issued tokens
    pub token_expiry: Duration,
    /// OAuth client registry file
    pub oauth_clients_file: PathBuf,
    /// Base directory for file writes
    pub files_dir: PathBuf,
    /// External task bridge script
    pub script_path: PathBuf,
}

// Secrets stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("legacy_auth_enabled", &self.legacy_auth_enabled)
            .field("legacy_token", &self.legacy_token.as_ref().map(|_| "<redacted>"))
            .field("jwt_secret", &"<redacted>")
            .field("token_issuer", &self.token_issuer)
            .field("token_expiry", &self.token_expiry)
            .field("oauth_clients_file", &self.oauth_clients_file)
            .field("files_dir", &self.files_dir)
            .field("script_path", &self.script_path)
            .finish()
    }
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let home = get("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        let share_dir = data_dir(&home);

        let environment = Environment::parse(get("OMNIDROP_ENV").as_deref())?;

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("Invalid PORT '{raw}': {e}")))?,
            None => PRODUCTION_PORT,
        };

        let legacy_auth_enabled = get("OMNIDROP_LEGACY_AUTH_ENABLED")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        let token_expiry = match get("OMNIDROP_TOKEN_EXPIRY") {
            Some(raw) => humantime::parse_duration(raw.trim())
                .map_err(|e| Error::Config(format!("Invalid OMNIDROP_TOKEN_EXPIRY '{raw}': {e}")))?,
            None => DEFAULT_TOKEN_EXPIRY,
        };
        // Token lifetimes are whole seconds on the wire.
        if token_expiry.as_secs() == 0 {
            return Err(Error::Config(
                "OMNIDROP_TOKEN_EXPIRY must be at least 1s".to_string(),
            ));
        }

        let production_script = production_script_path(&home);
        let script_path = match get("OMNIDROP_SCRIPT") {
            Some(path) => PathBuf::from(path),
            None if environment == Environment::Production => production_script.clone(),
            None => PathBuf::from("omnidrop.applescript"),
        };

        let jwt_secret = resolve_secret(get("OMNIDROP_JWT_SECRET"), legacy_auth_enabled)?;

        let config = Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            environment,
            legacy_auth_enabled,
            legacy_token: get("TOKEN"),
            jwt_secret,
            token_issuer: TOKEN_ISSUER.to_string(),
            token_expiry,
            oauth_clients_file: get("OMNIDROP_OAUTH_CLIENTS_FILE")
                .map_or_else(|| share_dir.join(CLIENTS_FILE_NAME), PathBuf::from),
            files_dir: get("OMNIDROP_FILES_DIR")
                .map_or_else(|| share_dir.join("files"), PathBuf::from),
            script_path,
        };

        config.validate(&production_script)?;
        Ok(config)
    }

    fn validate(&self, production_script: &Path) -> Result<()> {
        if self.legacy_auth_enabled && self.legacy_token.is_none() {
            return Err(Error::Config(
                "Legacy authentication is enabled but TOKEN is empty".to_string(),
            ));
        }

        if self.port == PRODUCTION_PORT && self.environment != Environment::Production {
            return Err(Error::Config(format!(
                "Port {PRODUCTION_PORT} is reserved for production (OMNIDROP_ENV={})",
                self.environment
            )));
        }

        if self.environment == Environment::Test && !TEST_PORT_RANGE.contains(&self.port) {
            return Err(Error::Config(format!(
                "Test environment must use a port in {}-{} (got {})",
                TEST_PORT_RANGE.start(),
                TEST_PORT_RANGE.end(),
                self.port
            )));
        }

        if self.environment != Environment::Production
            && same_path(&self.script_path, production_script)
        {
            return Err(Error::Config(format!(
                "OMNIDROP_SCRIPT points at the production install ({}) outside production",
                production_script.display()
            )));
        }

        Ok(())
    }
}

/// Client registry path as the server would resolve it, without the other
/// startup checks (used by the `clients` subcommand)
pub fn clients_file_from_env() -> Result<PathBuf> {
    let get = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
    if let Some(path) = get("OMNIDROP_OAUTH_CLIENTS_FILE") {
        return Ok(PathBuf::from(path));
    }
    let home = get("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(data_dir(&home).join(CLIENTS_FILE_NAME))
}

fn data_dir(home: &Path) -> PathBuf {
    home.join(".local").join("share").join("omnidrop")
}

/// Canonical install location of the production task bridge script
pub fn production_script_path(home: &Path) -> PathBuf {
    data_dir(home).join("omnidrop.applescript")
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn resolve_secret(secret: Option<String>, legacy_auth_enabled: bool) -> Result<String> {
    match secret {
        Some(secret) if secret.len() >= MIN_SECRET_LEN => Ok(secret),
        Some(_) => Err(Error::Config(format!(
            "OMNIDROP_JWT_SECRET must be at least {MIN_SECRET_LEN} bytes"
        ))),
        None if legacy_auth_enabled => {
            warn!("OMNIDROP_JWT_SECRET not set; using an ephemeral signing secret (issued tokens die with the process)");
            Ok(generate_secret(EPHEMERAL_SECRET_LEN))
        }
        None => Err(Error::Config(
            "OMNIDROP_JWT_SECRET is required when legacy authentication is disabled".to_string(),
        )),
    }
}

/// Generate a random URL-safe secret from `len` random bytes
#[must_use]
pub fn generate_secret(len: usize) -> String {
    use base64::Engine;
    use rand::Rng;

    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
