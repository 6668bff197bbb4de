//! Persistent strategy state
//!
//! The engine owns two pieces of persistent state per strategy: the last
//! yield reference and the continuation slot. A [`StateStore`] keeps them
//! across restarts.
//!
//! # Storage Format
//!
//! [`FileStateStore`] writes a versioned [`StrategyStateRecord`] with bincode
//! to a temporary file and renames it over the previous one, so a crash never
//! leaves a torn record behind.

use crate::{continuation::ContinuationState, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current record schema version
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Engine-owned strategy state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyState {
    /// Previous-period yield measurement; `None` before the first cycle
    pub last_yield_reference: Option<u128>,

    /// Suspended cycle, if any
    pub continuation: ContinuationState,
}

/// On-disk record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStateRecord {
    /// Schema version
    pub version: u32,

    /// Owning strategy
    pub strategy_id: String,

    /// State
    pub state: StrategyState,
}

/// Persistence backend for [`StrategyState`]
pub trait StateStore: Send {
    /// Load the saved state, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<StrategyState>>;

    /// Replace the saved state
    fn save(&mut self, state: &StrategyState) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Option<StrategyState>,
}

impl MemoryStateStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<StrategyState>> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &StrategyState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }
}

/// File-backed store
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    strategy_id: String,
}

impl FileStateStore {
    /// Store the record of `strategy_id` at `path`
    pub fn new(path: impl Into<PathBuf>, strategy_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            strategy_id: strategy_id.into(),
        }
    }

    /// Record location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<StrategyState>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: StrategyStateRecord = bincode::deserialize(&bytes)?;
        if record.version != STATE_SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "unsupported state schema version {} (expected {})",
                record.version, STATE_SCHEMA_VERSION
            )));
        }
        if record.strategy_id != self.strategy_id {
            return Err(Error::Storage(format!(
                "state file belongs to strategy {}, not {}",
                record.strategy_id, self.strategy_id
            )));
        }
        Ok(Some(record.state))
    }

    fn save(&mut self, state: &StrategyState) -> Result<()> {
        let record = StrategyStateRecord {
            version: STATE_SCHEMA_VERSION,
            strategy_id: self.strategy_id.clone(),
            state: state.clone(),
        };
        let bytes = bincode::serialize(&record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        std::fs::write(&temp, &bytes)?;
        std::fs::rename(&temp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Strategy state saved"
        );
        Ok(())
    }
}
