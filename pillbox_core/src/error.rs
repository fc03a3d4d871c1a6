//! Error types for the pillbox_core library.

use std::io;
use std::path::PathBuf;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pillbox_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed medication settings or intake input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// An intake asked for more pills than the container holds
    #[error("Insufficient inventory: requested {requested}, only {remaining} remaining")]
    InsufficientInventory { requested: u32, remaining: u32 },

    /// The persistent store could not load or save the ledger
    #[error("Persistence failure at {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// The stored ledger changed since it was loaded
    #[error("Conflicting update: loaded at revision {expected}, store is at {found}")]
    Conflict { expected: u64, found: u64 },

    /// Remote mirror error
    #[error("Mirror error: {0}")]
    Mirror(String),
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Number of pills missing to satisfy an intake, if this is an
    /// insufficient-inventory error.
    pub fn shortfall(&self) -> Option<u32> {
        match self {
            Error::InsufficientInventory {
                requested,
                remaining,
            } => Some(requested.saturating_sub(*remaining)),
            _ => None,
        }
    }
}
