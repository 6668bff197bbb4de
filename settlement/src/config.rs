//! Configuration for the settlement engine

use crate::{
    fees::PlatformFees,
    math::FULL_PERCENT,
    types::{Asset, AssetGroup},
    Error, Result,
};
use ledger_core::HolderId;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strategy identifier
    pub strategy_id: String,

    /// Asset group, in order
    pub assets: Vec<AssetConfig>,

    /// Ledger holders the engine mints to and burns from
    pub holders: HolderConfig,

    /// Bootstrap-phase parameters
    pub bootstrap: BootstrapConfig,

    /// Default platform fees
    pub fees: FeeConfig,

    /// Strategy state file; in-memory when unset
    pub state_path: Option<PathBuf>,

    /// Actor configuration
    pub actor: ActorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy_id: "strategy-0".to_string(),
            assets: vec![AssetConfig {
                token: "USDC".to_string(),
                decimals: 6,
            }],
            holders: HolderConfig::default(),
            bootstrap: BootstrapConfig::default(),
            fees: FeeConfig::default(),
            state_path: None,
            actor: ActorConfig::default(),
        }
    }
}

/// Asset entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Token identifier
    pub token: String,

    /// Decimal places
    pub decimals: u8,
}

/// Ledger holders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderConfig {
    /// Holder of shares owed to depositors and queued for withdrawal
    pub vault: String,

    /// Receiver of the initially locked shares
    pub locked: String,
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            vault: "strategy-vault".to_string(),
            locked: "locked-shares".to_string(),
        }
    }
}

/// Bootstrap-phase parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Supply floor below which the strategy is bootstrapping
    pub initial_locked_shares: u64,

    /// Shares minted per unit of worth while bootstrapping
    pub initial_share_multiplier: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            initial_locked_shares: 1_000_000_000_000, // 10^12
            initial_share_multiplier: 1_000,
        }
    }
}

/// Default platform fees as decimal fractions ("0.10" = 10%)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Ecosystem fee fraction
    pub ecosystem_fee: Decimal,

    /// Treasury fee fraction
    pub treasury_fee: Decimal,

    /// Ecosystem fee receiver
    pub ecosystem_receiver: String,

    /// Treasury fee receiver
    pub treasury_receiver: String,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            ecosystem_fee: Decimal::new(10, 2), // 10%
            treasury_fee: Decimal::new(5, 2),   // 5%
            ecosystem_receiver: "ecosystem-fees".to_string(),
            treasury_receiver: "treasury-fees".to_string(),
        }
    }
}

impl FeeConfig {
    /// Convert to basis-point fees
    pub fn to_platform_fees(&self) -> Result<PlatformFees> {
        let fees = PlatformFees {
            ecosystem_fee: fraction_to_bps(self.ecosystem_fee)?,
            treasury_fee: fraction_to_bps(self.treasury_fee)?,
            ecosystem_receiver: HolderId::new(self.ecosystem_receiver.clone()),
            treasury_receiver: HolderId::new(self.treasury_receiver.clone()),
        };
        fees.validate()?;
        Ok(fees)
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Mailbox capacity
    pub mailbox_size: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self { mailbox_size: 64 }
    }
}

fn fraction_to_bps(fraction: Decimal) -> Result<u128> {
    if fraction.is_sign_negative() || fraction > Decimal::ONE {
        return Err(Error::InvalidPlatformFees(format!(
            "fee fraction {} outside [0, 1]",
            fraction
        )));
    }
    (fraction * Decimal::from(FULL_PERCENT as u64))
        .round()
        .to_u128()
        .ok_or_else(|| Error::InvalidPlatformFees(format!("fee fraction {}", fraction)))
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(id) = std::env::var("SETTLEMENT_STRATEGY_ID") {
            config.strategy_id = id;
        }

        if let Ok(path) = std::env::var("SETTLEMENT_STATE_PATH") {
            config.state_path = Some(PathBuf::from(path));
        }

        if let Ok(fee) = std::env::var("SETTLEMENT_ECOSYSTEM_FEE") {
            config.fees.ecosystem_fee = parse_decimal("SETTLEMENT_ECOSYSTEM_FEE", &fee)?;
        }

        if let Ok(fee) = std::env::var("SETTLEMENT_TREASURY_FEE") {
            config.fees.treasury_fee = parse_decimal("SETTLEMENT_TREASURY_FEE", &fee)?;
        }

        if let Ok(size) = std::env::var("SETTLEMENT_MAILBOX_SIZE") {
            config.actor.mailbox_size = size
                .parse()
                .map_err(|e| Error::Config(format!("SETTLEMENT_MAILBOX_SIZE: {}", e)))?;
        }

        Ok(config)
    }

    /// Validate once at construction
    pub fn validate(&self) -> Result<()> {
        if self.strategy_id.trim().is_empty() {
            return Err(Error::Config("strategy_id is empty".to_string()));
        }
        if self.assets.is_empty() {
            return Err(Error::Config("asset group is empty".to_string()));
        }
        if self.assets.iter().any(|a| a.token.trim().is_empty()) {
            return Err(Error::Config("asset token is empty".to_string()));
        }
        if self.holders.vault.trim().is_empty() || self.holders.locked.trim().is_empty() {
            return Err(Error::InvalidCollaborator(
                "vault or locked holder is empty".to_string(),
            ));
        }
        if self.holders.vault == self.holders.locked {
            return Err(Error::InvalidCollaborator(
                "vault and locked holder must differ".to_string(),
            ));
        }
        if self.bootstrap.initial_locked_shares == 0 {
            return Err(Error::Config("initial_locked_shares must be positive".to_string()));
        }
        if self.bootstrap.initial_share_multiplier == 0 {
            return Err(Error::Config(
                "initial_share_multiplier must be positive".to_string(),
            ));
        }
        if self.actor.mailbox_size == 0 {
            return Err(Error::Config("mailbox_size must be positive".to_string()));
        }
        self.fees.to_platform_fees()?;
        Ok(())
    }

    /// Asset group
    pub fn asset_group(&self) -> AssetGroup {
        AssetGroup::new(
            self.assets
                .iter()
                .map(|a| Asset::new(a.token.clone(), a.decimals))
                .collect(),
        )
    }

    /// Vault holder
    pub fn vault_holder(&self) -> HolderId {
        HolderId::new(self.holders.vault.clone())
    }

    /// Locked-shares holder
    pub fn locked_holder(&self) -> HolderId {
        HolderId::new(self.holders.locked.clone())
    }
}

fn parse_decimal(var: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim()).map_err(|e| Error::Config(format!("{}: {}", var, e)))
}
