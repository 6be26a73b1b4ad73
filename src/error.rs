//! Error types for Omnidrop

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Omnidrop
pub type Result<T> = std::result::Result<T, Error>;

/// Startup, configuration and registry errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client registry file could not be parsed
    #[error("Invalid client registry {path}: {source}")]
    Registry {
        /// Registry file path
        path: PathBuf,
        /// Parse failure
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
