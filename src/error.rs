//! Error types for spoolmail
//!
//! Only failures that stop an operation live here. Expected delivery-path
//! outcomes (lock contention, unreachable destination, transport failure,
//! a watcher already running) are reported as values, not errors.

use crate::queue::EntryId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for spoolmail operations
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Errors that abort a spool operation
#[derive(Error, Debug)]
pub enum SpoolError {
    /// The entry has no payload or no arguments file
    #[error("Queue entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Destination lookup failed (unknown account, unreadable msmtprc, ...)
    #[error("Cannot resolve destination: {0}")]
    Resolve(#[from] msmtprc::Error),

    /// The spool directory could not be created or read
    #[error("Spool directory {}: {source}", path.display())]
    SpoolDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background process could not be started
    #[error("Failed to launch background {job}: {source}")]
    Launch {
        job: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl SpoolError {
    /// True when the entry vanished, typically because a concurrent flush
    /// delivered it first
    pub fn is_not_found(&self) -> bool {
        matches!(self, SpoolError::EntryNotFound(_))
    }
}
