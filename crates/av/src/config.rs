//! Address vector configuration.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::addr::AvType;
use crate::ah::AHN_SPACE;

/// Capacity used when the caller does not ask for one.
pub const MIN_AV_SIZE: usize = 16384;

/// Most same-host peers the shared-memory side channel can address.
pub const SHM_MAX_AV_COUNT: usize = 256;

/// What happens to historical reverse entries when a connection is removed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HistoryRetention {
    /// Drop the historical entry together with the connection.
    #[default]
    Prune,
    /// Keep the removed connection resolvable by its exact key until it is
    /// pruned explicitly.
    Retain,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("shm capacity {0} exceeds {max}", max = SHM_MAX_AV_COUNT)]
    ShmCapacity(usize),
    #[error("address handle limit {0} is outside 1..={max}", max = AHN_SPACE)]
    AddressHandleLimit(usize),
    #[error("address table mode {table} does not match configured mode {configured}")]
    ModeMismatch { configured: AvType, table: AvType },
}

/// Address vector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvConfig {
    /// Addressing mode. Immutable once the address vector is open.
    pub av_type: AvType,
    /// Maximum live connections. 0 selects [`MIN_AV_SIZE`].
    pub count: usize,
    /// Retention policy for historical reverse entries.
    pub history: HistoryRetention,
    /// Shared-memory slots available for same-host peers.
    pub shm_capacity: usize,
    /// Cap on distinct raw addresses. None = the full handle number space.
    pub max_address_handles: Option<usize>,
}

impl Default for AvConfig {
    fn default() -> Self {
        Self {
            av_type: AvType::Table,
            count: 0,
            history: HistoryRetention::Prune,
            shm_capacity: SHM_MAX_AV_COUNT,
            max_address_handles: None,
        }
    }
}

impl AvConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_av_type(mut self, av_type: AvType) -> Self {
        self.av_type = av_type;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_history(mut self, history: HistoryRetention) -> Self {
        self.history = history;
        self
    }

    pub fn with_shm_capacity(mut self, shm_capacity: usize) -> Self {
        self.shm_capacity = shm_capacity;
        self
    }

    pub fn with_max_address_handles(mut self, max: usize) -> Self {
        self.max_address_handles = Some(max);
        self
    }

    /// Effective connection capacity.
    pub fn capacity(&self) -> usize {
        if self.count == 0 {
            MIN_AV_SIZE
        } else {
            self.count
        }
    }

    /// Effective address handle limit.
    pub fn address_handle_limit(&self) -> usize {
        self.max_address_handles.unwrap_or(AHN_SPACE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shm_capacity > SHM_MAX_AV_COUNT {
            return Err(ConfigError::ShmCapacity(self.shm_capacity));
        }
        if let Some(max) = self.max_address_handles {
            if max == 0 || max > AHN_SPACE {
                return Err(ConfigError::AddressHandleLimit(max));
            }
        }
        Ok(())
    }
}
