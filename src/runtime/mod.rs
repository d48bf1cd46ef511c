//! Runtime configuration and public API
//!
//! This module provides `ManagerConfig` and re-exports the participant
//! manager, lifecycle, registry, and connector types.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Submodules
pub mod attempt;
pub mod control;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod loopback;
pub mod manager;
pub mod registry;
pub mod signal;

use attempt::AttemptTiming;
use error::{NpcError, Result, StorageError, StorageResult};

/// Widest suffix that still fits in a u64 draw
const MAX_SUFFIX_DIGITS: u32 = 18;

/// Configuration for the participant manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Handshake deadline in milliseconds
    pub connect_timeout_ms: u64,

    /// How long teardown waits for an abandoned handshake to settle
    pub settle_grace_ms: u64,

    /// Maximum length of an assigned name, in characters
    pub max_name_len: usize,

    /// Decimal digits in a collision suffix
    pub suffix_digits: u32,

    /// Candidates tried before allocation gives up
    pub max_allocation_attempts: u32,

    /// Seed for the suffix generator (`None` draws from OS entropy)
    pub name_seed: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 8000,
            settle_grace_ms: 2000,
            max_name_len: 24,
            suffix_digits: 6,
            max_allocation_attempts: 64,
            name_seed: None,
        }
    }
}

impl ManagerConfig {
    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(NpcError::Config("connect_timeout_ms must be positive".into()));
        }
        if self.suffix_digits == 0 || self.suffix_digits > MAX_SUFFIX_DIGITS {
            return Err(NpcError::Config(format!(
                "suffix_digits must be between 1 and {}",
                MAX_SUFFIX_DIGITS
            )));
        }
        // Room for the separator, the digits, and at least one prefix character
        if self.max_name_len < self.suffix_digits as usize + 2 {
            return Err(NpcError::Config(format!(
                "max_name_len {} cannot hold a {}-digit suffix",
                self.max_name_len, self.suffix_digits
            )));
        }
        if self.max_allocation_attempts == 0 {
            return Err(NpcError::Config(
                "max_allocation_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Handshake deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Grace period for abandoned handshakes
    pub fn settle_grace(&self) -> Duration {
        Duration::from_millis(self.settle_grace_ms)
    }

    pub(crate) fn attempt_timing(&self) -> AttemptTiming {
        AttemptTiming {
            timeout: self.connect_timeout(),
            settle_grace: self.settle_grace(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let config = read_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        write_config(self, path)?;
        Ok(())
    }
}

fn read_config(path: &Path) -> StorageResult<ManagerConfig> {
    if !path.exists() {
        return Err(StorageError::PathNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn write_config(config: &ManagerConfig, path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(config)?;
    std::fs::write(path, data)?;
    Ok(())
}

// Re-export commonly used types
pub use attempt::{AttemptOutcome, ConnectionAttempt, Connector};
pub use control::{ManagerStatus, ParticipantSummary};
pub use ids::{HumanId, Identity, ParticipantId, ScriptId, SessionHandle};
pub use lifecycle::{Participant, Phase};
pub use manager::NpcManager;
pub use registry::{HumanRoster, LiveNames, NameRegistry, NoHumans, RandomSuffix, RenameEvent, SuffixStrategy};
pub use signal::CancelToken;
