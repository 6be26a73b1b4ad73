//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};

/// Omnidrop - authenticated local task and file drop service
#[derive(Parser, Debug)]
#[command(name = "omnidrop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "OMNIDROP_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Name understood by `setup_tracing`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Print a bcrypt hash for a client secret
    ///
    /// Without SECRET, a random secret is generated and printed alongside
    /// its hash.
    HashSecret {
        /// Secret to hash
        secret: Option<String>,

        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },

    /// List enabled OAuth clients from the registry
    Clients,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["omnidrop"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["omnidrop", "serve", "--log-format", "json", "--log-level", "debug"])
                .unwrap();
        assert_eq!(cli.command, Some(Command::Serve));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn hash_secret_arguments() {
        let cli = Cli::try_parse_from(["omnidrop", "hash-secret", "hunter2", "--cost", "6"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::HashSecret {
                secret: Some("hunter2".to_string()),
                cost: 6
            })
        );

        let cli = Cli::try_parse_from(["omnidrop", "hash-secret"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::HashSecret {
                secret: None,
                cost: bcrypt::DEFAULT_COST
            })
        );
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["omnidrop", "--log-format", "xml"]).is_err());
    }
}
