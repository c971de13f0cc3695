//! Configuration loading

use anyhow::{anyhow, Context, Result};
use btzen_core::{kinds, Address, Mode, SensorKind};
use btzen_sensor::BusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default, rename = "sensor")]
    pub sensors: Vec<SensorConfig>,
}

/// One sensor to read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Device hardware address
    pub address: Address,
    /// Sensor kind name, e.g. "battery" or "temperature"
    pub kind: String,
    /// Wait for notifications instead of polling
    #[serde(default)]
    pub notifying: bool,
    /// Trigger payload as hex, written after the sensor is switched on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Pause between polling reads in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

impl SensorConfig {
    pub fn kind(&self) -> Result<&'static SensorKind> {
        kinds::by_name(&self.kind).ok_or_else(|| anyhow!("Unknown sensor kind {:?}", self.kind))
    }

    pub fn mode(&self) -> Mode {
        if self.notifying {
            Mode::Notifying
        } else {
            Mode::Polling
        }
    }

    pub fn trigger(&self) -> Result<Option<Vec<u8>>> {
        self.trigger
            .as_deref()
            .map(hex::decode)
            .transpose()
            .with_context(|| format!("Invalid trigger payload for {}", self.address))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), sensors = config.sensors.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config {
            bus: BusConfig::default(),
            sensors: Vec::new(),
        })
    }
}

/// Save a sample configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let address = Address::parse("B0:B4:48:C9:4B:01")?;
    let config = Config {
        bus: BusConfig::default(),
        sensors: vec![
            SensorConfig {
                address: address.clone(),
                kind: "battery".to_string(),
                notifying: false,
                trigger: None,
                interval_ms: 60_000,
            },
            SensorConfig {
                address,
                kind: "temperature".to_string(),
                notifying: true,
                trigger: None,
                interval_ms: default_interval_ms(),
            },
        ],
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
