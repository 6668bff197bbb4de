//! Error types for the settlement engine

use crate::{access::Role, range::SlippageCheck};
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category, for tooling that branches on failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Construction-time configuration problem
    Configuration,
    /// Call rejected before any state was touched
    Precondition,
    /// Call violates the settle/continue protocol
    StateMachine,
    /// Caller lacks the required role
    Authorization,
    /// External protocol, ledger or runtime failure
    External,
    /// Persistence or serialization failure
    Internal,
}

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Collaborator identity missing or invalid
    #[error("Invalid collaborator: {0}")]
    InvalidCollaborator(String),

    /// Configured asset group does not match the external protocol
    #[error("Asset group mismatch: configured {configured:?}, protocol expects {expected:?}")]
    AssetGroupMismatch {
        /// Configured tokens
        configured: Vec<String>,
        /// Tokens the adapter works with
        expected: Vec<String>,
    },

    /// Yield measured against a zero baseline
    #[error("Worth is zero")]
    WorthIsZero,

    /// Value outside the caller-supplied range
    #[error("Slippage check {check:?} failed: {value} not in [{min}, {max}]")]
    SlippageCheckFailed {
        /// Which check failed
        check: SlippageCheck,
        /// Observed value
        value: u128,
        /// Inclusive minimum
        min: u128,
        /// Inclusive maximum
        max: u128,
    },

    /// Slippage ranges do not fit the call
    #[error("Invalid slippage ranges: {0}")]
    InvalidSlippageRanges(String),

    /// Swap instruction could not be decoded
    #[error("Malformed swap instruction: {0}")]
    MalformedSwapInstruction(String),

    /// Per-asset vector has the wrong length
    #[error("Asset count mismatch: expected {expected}, got {actual}")]
    AssetCountMismatch {
        /// Assets in the group
        expected: usize,
        /// Entries supplied
        actual: usize,
    },

    /// Withdrawal exceeds the shares available
    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares {
        /// Shares requested
        requested: u128,
        /// Shares available
        available: u128,
    },

    /// Platform fees exceed the full percentage
    #[error("Invalid platform fees: {0}")]
    InvalidPlatformFees(String),

    /// Fixed-point arithmetic overflow
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),

    /// Settle invoked while a continuation is outstanding
    #[error("Continuation outstanding: settle must be continued first")]
    ContinuationOutstanding,

    /// Continue invoked with nothing to continue
    #[error("No continuation outstanding")]
    NoContinuation,

    /// External action still incomplete
    #[error("External action not finished")]
    ActionNotFinished,

    /// Deposit continuation lost value
    #[error("Invalid deposit continuation: value after {value_after} < value before {value_before}")]
    InvalidDepositContinuation {
        /// NAV before the deposit was initiated
        value_before: u128,
        /// NAV after the deposit landed
        value_after: u128,
    },

    /// Emergency withdrawal could not complete atomically
    #[error("Emergency withdrawal did not complete atomically")]
    EmergencyWithdrawalIncomplete,

    /// Caller lacks a role
    #[error("Unauthorized: {principal} lacks role {role:?}")]
    Unauthorized {
        /// Caller
        principal: String,
        /// Missing role
        role: Role,
    },

    /// External protocol adapter failure
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Share ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Strategy state persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Actor mailbox closed or reply dropped
    #[error("Actor error: {0}")]
    Actor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Category of the error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) | Error::InvalidCollaborator(_) | Error::AssetGroupMismatch { .. } => {
                ErrorClass::Configuration
            }
            Error::WorthIsZero
            | Error::SlippageCheckFailed { .. }
            | Error::InvalidSlippageRanges(_)
            | Error::MalformedSwapInstruction(_)
            | Error::AssetCountMismatch { .. }
            | Error::InsufficientShares { .. }
            | Error::InvalidPlatformFees(_)
            | Error::ArithmeticOverflow(_) => ErrorClass::Precondition,
            Error::ContinuationOutstanding
            | Error::NoContinuation
            | Error::ActionNotFinished
            | Error::InvalidDepositContinuation { .. }
            | Error::EmergencyWithdrawalIncomplete => ErrorClass::StateMachine,
            Error::Unauthorized { .. } => ErrorClass::Authorization,
            Error::Adapter(_) | Error::Ledger(_) | Error::Actor(_) => ErrorClass::External,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => ErrorClass::Internal,
        }
    }

    /// Caller should invoke `settle_continue` again later
    pub fn needs_continuation_retry(&self) -> bool {
        matches!(self, Error::ActionNotFinished | Error::ContinuationOutstanding)
    }
}
