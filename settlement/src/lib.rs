//! Strategy Settlement Engine
//!
//! Settles one yield-bearing strategy per cycle: deposits and withdrawals are
//! matched internally first, only the net flow reaches the external protocol,
//! and performance fees are charged as newly minted shares.
//!
//! # Architecture
//!
//! Each cycle runs in four phases:
//!
//! 1. **Measurement**: NAV before, protocol yield, base yield, compound yield
//! 2. **Matching**: net deposits against withdrawals at the current NAV
//! 3. **Action**: deposit or redeem the net flow through an adapter
//! 4. **Finalization**: mint fee, dilution and deposit shares in one batch
//!
//! Protocols that cannot finish an action within the call suspend the cycle.
//! The context is persisted and `settle_continue` completes it later; until
//! then no new cycle can start.
//!
//! # Example
//!
//! ```no_run
//! use strategy_settlement::{
//!     adapter::{InstantVault, PoolBook},
//!     Capability, EngineConfig, Role, SettleParams, SettlementEngine, SlippageRanges,
//! };
//!
//! fn main() -> strategy_settlement::Result<()> {
//!     let config = EngineConfig::default();
//!     let fees = config.fees.to_platform_fees()?;
//!     let mut engine: SettlementEngine = SettlementEngine::builder(config)
//!         .adapter(InstantVault::new(PoolBook::new(vec!["USDC".to_string()])).into())
//!         .build()?;
//!
//!     let keeper = Capability::new("keeper").with_role(Role::DoHardWorker);
//!     let report = engine.settle(
//!         &keeper,
//!         SettleParams {
//!             deposited_assets: vec![1_000_000_000],
//!             withdrawal_shares: 0,
//!             base_yield: 0,
//!             exchange_rates: vec![1_000_000],
//!             slippage_ranges: SlippageRanges::unbounded(1),
//!             swap_instructions: vec![],
//!             platform_fees: fees,
//!         },
//!     )?;
//!     println!("Minted {} shares", report.shares_minted);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod access;
pub mod actor;
pub mod adapter;
pub mod config;
pub mod continuation;
pub mod engine;
pub mod error;
pub mod fees;
pub mod matching;
pub mod math;
pub mod metrics;
pub mod range;
pub mod state;
pub mod types;
pub mod yield_tracker;

// Re-exports
pub use access::{Capability, Role};
pub use actor::{spawn_settlement_actor, EngineSnapshot, SettlementHandle};
pub use adapter::{ContinuationPayload, ExternalActionAdapter, StrategyAdapter};
pub use config::EngineConfig;
pub use continuation::{ContinuationKind, ContinuationState};
pub use engine::SettlementEngine;
pub use error::{Error, ErrorClass, Result};
pub use fees::{FeeSplit, PlatformFees};
pub use range::{PackedRange, SlippageCheck, SlippageRanges};
pub use state::{FileStateStore, MemoryStateStore, StateStore, StrategyState};
pub use types::{
    AssetGroup, ContinueParams, EmergencyReport, SettleParams, SettlementEvent, SettlementReport,
};
