// ── Core error types ──
//
// Every failure the core can report. None of them are fatal to the
// periodic workers: loops log, count, and carry on with the next tick.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("{component} is already running")]
    AlreadyRunning { component: &'static str },

    #[error("{component} is not running")]
    NotRunning { component: &'static str },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("Message processing failed: {message}")]
    Processing { message: String },

    #[error("Discovery source {source_name} failed: {message}")]
    Discovery {
        source_name: String,
        message: String,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub(crate) fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }
}

// Payload decoding only happens on the ingestion path.
impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::processing(format!("malformed payload: {err}"))
    }
}
