//! Error types for feedloc-core
//!
//! Nothing here is fatal to the pipeline. Storage errors degrade the cache
//! to memory only and network errors settle as an empty location.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for feedloc operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Storage Errors
    // ===================
    #[error("Failed to read storage key '{key}': {message}")]
    StorageRead { key: String, message: String },

    #[error("Failed to write storage key '{key}': {message}")]
    StorageWrite { key: String, message: String },

    #[error("Malformed record for '{handle}' in storage: {message}")]
    StorageDecode { handle: String, message: String },

    #[error("Failed to serialize {what}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Network Errors
    // ===================
    #[error("Location request for '{handle}' failed")]
    Http {
        handle: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Location request for '{handle}' returned status {status}")]
    HttpStatus { handle: String, status: u16 },

    #[error("Malformed location response for '{handle}': {message}")]
    ResponseDecode { handle: String, message: String },

    #[error("Location request for '{handle}' timed out after {timeout_ms}ms")]
    Timeout { handle: String, timeout_ms: u64 },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===================
    // Bridge Errors
    // ===================
    #[error("Bridge port closed: {direction}")]
    PortClosed { direction: &'static str },
}

impl CoreError {
    /// Failures of the remote lookup itself, as opposed to local faults
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CoreError::Http { .. }
                | CoreError::HttpStatus { .. }
                | CoreError::ResponseDecode { .. }
                | CoreError::Timeout { .. }
        )
    }
}

/// Degraded state indicator for the persistent cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedState {
    /// Storage reads and writes succeed
    Healthy,
    /// Storage failed; the in-memory mirror is the only copy for this session
    MemoryOnly { reason: String },
}

impl DegradedState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}
