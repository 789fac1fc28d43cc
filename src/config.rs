//! Device start-up configuration.

use crate::alarm::{AlarmConfig, DEFAULT_GPS_MASK, DEFAULT_INTERRUPT_TIMEOUT_MS, DEFAULT_ODOMETER_MASK};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Values the device boots with. Every field can later be changed by the host
/// through the command protocol; nothing is persisted back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Interrupt line auto-release, ms. 0 keeps the line asserted until read.
    pub interrupt_timeout_ms: u32,

    pub odometer_event_mask: u8,
    pub gps_event_mask: u8,

    /// Monitor line period, seconds. 0 disables it.
    pub monitor_period_s: u32,

    /// Over-speed threshold in pulses/s. 0 disables it.
    pub over_speed: u32,
    /// Deceleration threshold in pulses/s². 0 disables it.
    pub emergency_brake: u32,
    /// Pulses between distance events. 0 disables them.
    pub distance_interval: u32,

    pub gps_powered: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            interrupt_timeout_ms: DEFAULT_INTERRUPT_TIMEOUT_MS,
            odometer_event_mask: DEFAULT_ODOMETER_MASK,
            gps_event_mask: DEFAULT_GPS_MASK,
            monitor_period_s: 1,
            over_speed: 0,
            emergency_brake: 0,
            distance_interval: 0,
            gps_powered: true,
        }
    }
}

impl DeviceConfig {
    /// Quiet profile for tests and scripted sessions: no monitor line.
    pub fn silent() -> Self {
        Self {
            monitor_period_s: 0,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn alarm_config(&self) -> AlarmConfig {
        AlarmConfig {
            over_speed: self.over_speed,
            emergency_brake: self.emergency_brake,
            distance_interval: self.distance_interval,
            interrupt_timeout_ms: self.interrupt_timeout_ms,
        }
    }
}
