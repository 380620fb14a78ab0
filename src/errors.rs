//! Error types
//!
//! Domain errors are typed; binaries and the control loop wrap them in anyhow.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Quote source errors (transient unless stated otherwise)
#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("quote source returned status {status} for {pair}")]
    Status { pair: String, status: u16 },

    #[error("invalid quote data: {0}")]
    InvalidData(String),

    #[error("quote source unavailable: {0}")]
    Unavailable(String),
}

/// Classification of a failed execution
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    #[error("transaction reverted")]
    Reverted,

    #[error("transaction not confirmed")]
    Unconfirmed,

    #[error("execution timed out")]
    Timeout,

    #[error("rejected before submission")]
    Rejected,

    #[error("internal execution error")]
    Internal,
}

impl ExecutionErrorKind {
    /// The transaction may still land; its reference must be checked by hand
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::Unconfirmed | Self::Timeout)
    }
}

/// Capital state persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
