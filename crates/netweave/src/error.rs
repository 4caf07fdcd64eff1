//! Daemon error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use netweave_config::ConfigError;
use netweave_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const IO: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration value for {field}: {reason}")]
    #[diagnostic(
        code(netweave::config_invalid),
        help("Fix the value in {path} or the matching NETWEAVE_ environment variable.")
    )]
    ConfigInvalid {
        field: String,
        reason: String,
        path: String,
    },

    #[error("Could not load configuration from {path}")]
    #[diagnostic(code(netweave::config))]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(netweave::core))]
    Core(#[from] CoreError),

    #[error("Replay record {line} is malformed")]
    #[diagnostic(
        code(netweave::replay),
        help("Each line must be a JSON object with \"topic\" and \"payload\" fields.")
    )]
    ReplayRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(netweave::io))]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON: {0}")]
    #[diagnostic(code(netweave::json))]
    Json(#[from] serde_json::Error),
}

impl DaemonError {
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::Validation { field, reason } => Self::ConfigInvalid {
                field,
                reason,
                path,
            },
            source => Self::Config { path, source },
        }
    }

    /// Map this error to a process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid { .. } | Self::Config { .. } => exit_code::CONFIG,
            Self::Io(_) | Self::ReplayRecord { .. } => exit_code::IO,
            Self::Core(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
