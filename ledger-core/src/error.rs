//! Error types for the share ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Holder does not own enough shares for a burn or transfer
    #[error("Insufficient balance for {holder}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Holder being debited
        holder: String,
        /// Shares requested
        requested: u128,
        /// Shares owned
        available: u128,
    },

    /// Total supply or a balance would exceed `u128::MAX`
    #[error("Supply overflow while minting {amount} to {holder}")]
    SupplyOverflow {
        /// Holder being credited
        holder: String,
        /// Shares minted
        amount: u128,
    },

    /// Invalid holder identifier
    #[error("Invalid holder: {0}")]
    InvalidHolder(String),

    /// Invariant violation (supply conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
