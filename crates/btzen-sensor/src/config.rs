//! Bus handle configuration

use btzen_core::DEFAULT_ADAPTER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Number of `ServicesResolved` polls before giving up
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,
    /// Pause between `ServicesResolved` polls in milliseconds
    #[serde(default = "default_resolve_interval_ms")]
    pub resolve_interval_ms: u64,
    /// Bluetooth adapter the devices are connected through
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            resolve_attempts: default_resolve_attempts(),
            resolve_interval_ms: default_resolve_interval_ms(),
            adapter: default_adapter(),
        }
    }
}

impl BusConfig {
    pub fn resolve_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_interval_ms)
    }
}

fn default_resolve_attempts() -> u32 {
    10
}

fn default_resolve_interval_ms() -> u64 {
    1000
}

fn default_adapter() -> String {
    DEFAULT_ADAPTER.to_string()
}
