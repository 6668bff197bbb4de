//! Share Ledger Core
//!
//! Ownership-share ledger for pooled strategy positions.
//!
//! # Architecture
//!
//! - **Batches**: Every mutation is a [`ShareBatch`] applied all-or-nothing
//! - **Journal**: Each applied operation is recorded as a [`ShareEvent`]
//! - **Single Writer**: Callers serialise access; the ledger holds no locks

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Supply conservation: `total_supply == Σ balances`
//! - Supply moves only by mint and burn amounts, never by assignment
//! - Deterministic replay: same batches → same balances

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod ledger;
pub mod error;

// Re-exports
pub use error::{Error, Result};
pub use types::{HolderId, ShareBatch, ShareEvent, ShareEventKind, ShareOp};
pub use ledger::{InMemoryShareLedger, ShareLedger};
