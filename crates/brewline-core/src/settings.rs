//! # Settings Provider
//!
//! Runtime switches the engine reads but does not own. The binary backs
//! this with its TOML configuration; tests use [`StaticSettings`].

use crate::primitives::DEFAULT_POINTS_PER_UNIT_MILLI;
use serde::{Deserialize, Serialize};

/// Loyalty program switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltySettings {
    pub enabled: bool,
    /// Points per whole currency unit, in thousandths of a point.
    pub points_per_unit_milli: u64,
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            points_per_unit_milli: DEFAULT_POINTS_PER_UNIT_MILLI,
        }
    }
}

impl LoyaltySettings {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Source of runtime settings, read once per operation.
pub trait SettingsProvider: Send + Sync {
    fn loyalty(&self) -> LoyaltySettings;
}

/// Fixed settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSettings {
    loyalty: LoyaltySettings,
}

impl StaticSettings {
    #[must_use]
    pub fn new(loyalty: LoyaltySettings) -> Self {
        Self { loyalty }
    }
}

impl SettingsProvider for StaticSettings {
    fn loyalty(&self) -> LoyaltySettings {
        self.loyalty
    }
}
