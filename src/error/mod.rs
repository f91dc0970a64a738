//! Error handling for the node
//!
//! This module provides the error types for all chain, consensus, and
//! network operations.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Error types for node operations
#[derive(Debug, Clone)]
pub enum ChainError {
    /// Database-related errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Network communication errors
    Network(String),
    /// Transaction validation errors
    Transaction(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Malformed input at a boundary (addresses, hashes, decimals, frames)
    Format(String),
    /// Insufficient funds for transaction
    InsufficientFunds { required: u64, available: u64 },
    /// Block validation errors (fatal reject reasons, never retried)
    InvalidBlock(String),
    /// Mining errors
    Mining(String),
    /// Staking ledger errors
    Staking(String),
    /// Committed-state corruption detected (broken hash chain on startup)
    Corruption(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Database(msg) => write!(f, "Database error: {msg}"),
            ChainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            ChainError::Network(msg) => write!(f, "Network error: {msg}"),
            ChainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            ChainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            ChainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            ChainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ChainError::Io(msg) => write!(f, "I/O error: {msg}"),
            ChainError::Format(msg) => write!(f, "Format error: {msg}"),
            ChainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            ChainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            ChainError::Staking(msg) => write!(f, "Staking error: {msg}"),
            ChainError::Corruption(msg) => write!(f, "Store corruption: {msg}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl ChainError {
    /// Process exit code for the wrapper binary.
    ///
    /// 0 normal, 2 config invalid, 3 database corruption,
    /// 4 unrecoverable peer-layer fault, 1 everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChainError::Config(_) => 2,
            ChainError::Corruption(_) => 3,
            ChainError::Network(_) => 4,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ChainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for ChainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<secp256k1::Error> for ChainError {
    fn from(err: secp256k1::Error) -> Self {
        ChainError::Crypto(err.to_string())
    }
}
