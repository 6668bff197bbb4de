//! Core types for the share ledger
//!
//! All types are designed for:
//! - Deterministic serialization (serde)
//! - Exact arithmetic (integer share units, no floats)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Share holder identifier (vault, fee receiver, lock address, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderId(String);

impl HolderId {
    /// Create new holder ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty identifiers stand for an unset collaborator
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HolderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Single ledger mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareOp {
    /// Create shares for a holder
    Mint {
        /// Receiver
        to: HolderId,
        /// Shares created
        amount: u128,
    },

    /// Destroy shares owned by a holder
    Burn {
        /// Owner
        from: HolderId,
        /// Shares destroyed
        amount: u128,
    },

    /// Move shares between holders
    Transfer {
        /// Sender
        from: HolderId,
        /// Receiver
        to: HolderId,
        /// Shares moved
        amount: u128,
    },
}

impl ShareOp {
    /// Amount carried by the operation
    pub fn amount(&self) -> u128 {
        match self {
            ShareOp::Mint { amount, .. }
            | ShareOp::Burn { amount, .. }
            | ShareOp::Transfer { amount, .. } => *amount,
        }
    }
}

/// Ordered set of operations applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBatch {
    ops: Vec<ShareOp>,
}

impl ShareBatch {
    /// Create empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mint; zero amounts are dropped
    pub fn mint(&mut self, to: HolderId, amount: u128) -> &mut Self {
        if amount > 0 {
            self.ops.push(ShareOp::Mint { to, amount });
        }
        self
    }

    /// Queue a burn; zero amounts are dropped
    pub fn burn(&mut self, from: HolderId, amount: u128) -> &mut Self {
        if amount > 0 {
            self.ops.push(ShareOp::Burn { from, amount });
        }
        self
    }

    /// Queue a transfer; zero amounts are dropped
    pub fn transfer(&mut self, from: HolderId, to: HolderId, amount: u128) -> &mut Self {
        if amount > 0 {
            self.ops.push(ShareOp::Transfer { from, to, amount });
        }
        self
    }

    /// Queued operations
    pub fn ops(&self) -> &[ShareOp] {
        &self.ops
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sum of minted amounts
    pub fn total_minted(&self) -> u128 {
        self.ops
            .iter()
            .filter(|op| matches!(op, ShareOp::Mint { .. }))
            .map(ShareOp::amount)
            .sum()
    }

    /// Sum of burned amounts
    pub fn total_burned(&self) -> u128 {
        self.ops
            .iter()
            .filter(|op| matches!(op, ShareOp::Burn { .. }))
            .map(ShareOp::amount)
            .sum()
    }
}

/// Kind of journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShareEventKind {
    /// Shares minted
    Minted = 1,
    /// Shares burned
    Burned = 2,
    /// Shares transferred
    Transferred = 3,
}

/// Journal entry for an applied operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEvent {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Kind of mutation
    pub kind: ShareEventKind,

    /// Debited holder (burn, transfer)
    pub from: Option<HolderId>,

    /// Credited holder (mint, transfer)
    pub to: Option<HolderId>,

    /// Shares moved
    pub amount: u128,

    /// Total supply after the operation
    pub total_supply_after: u128,

    /// Applied timestamp
    pub recorded_at: DateTime<Utc>,
}

impl ShareEvent {
    /// Build journal entry for an operation
    pub fn from_op(op: &ShareOp, total_supply_after: u128) -> Self {
        let (kind, from, to) = match op {
            ShareOp::Mint { to, .. } => (ShareEventKind::Minted, None, Some(to.clone())),
            ShareOp::Burn { from, .. } => (ShareEventKind::Burned, Some(from.clone()), None),
            ShareOp::Transfer { from, to, .. } => (
                ShareEventKind::Transferred,
                Some(from.clone()),
                Some(to.clone()),
            ),
        };

        Self {
            event_id: Uuid::now_v7(),
            kind,
            from,
            to,
            amount: op.amount(),
            total_supply_after,
            recorded_at: Utc::now(),
        }
    }
}
