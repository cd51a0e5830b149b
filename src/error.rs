//! Error types for LedgerChain

use thiserror::Error;

/// Every failure the ledger core can report.
///
/// Absence (a missing block, account or node) is not an error: lookups return
/// `Ok(None)` so callers can tell "absent" apart from "broken".
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// A block or signed change request was rejected. Durable state is untouched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A query addressed a block number outside the stored range.
    #[error("Range error: {0}")]
    Range(String),

    /// Reading or writing chunk/snapshot files failed.
    #[error("Storage IO error: {0}")]
    StorageIo(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A peer could not be reached or returned garbage.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::StorageIo(err.to_string())
    }
}

impl From<tempfile::PersistError> for LedgerError {
    fn from(err: tempfile::PersistError) -> Self {
        LedgerError::StorageIo(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for LedgerError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LedgerError::Serialization(format!("bincode: {}", err))
    }
}

impl From<serde_cbor::Error> for LedgerError {
    fn from(err: serde_cbor::Error) -> Self {
        LedgerError::Serialization(format!("cbor: {}", err))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(format!("json: {}", err))
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Network(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
