//! Outbound command encoding.
//!
//! Each user intent maps to one tagged wire message `{action, id?, ...}`.
//! Validation happens here, before anything reaches the outbox: a rejected
//! command encodes nothing and mutates nothing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DeviceId;

/// Reporting intervals below this starve the radio; the hub rejects them too.
pub const MIN_REPORTING_INTERVAL_MS: u64 = 500;
/// Shortest sleep the firmware can schedule.
pub const MIN_SLEEP_SECONDS: u64 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{field} is empty after trimming")]
    EmptyField { field: &'static str },
    #[error("reporting interval {value}ms is below the {min}ms minimum")]
    IntervalTooShort { value: u64, min: u64 },
    #[error("sleep duration {value}s is below the {min}s minimum")]
    SleepTooShort { value: u64, min: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    On,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Hello,
    Rename { id: DeviceId, name: String },
    Power { id: DeviceId, mode: PowerMode },
    Deactivate { id: DeviceId },
    Activate { id: DeviceId },
    Release { id: DeviceId },
    Restore { id: DeviceId },
    Role { id: DeviceId, role: String },
    Reporting { id: DeviceId, interval: u64 },
    SleepDuration { id: DeviceId, seconds: u64 },
    Gpio { id: DeviceId, pin: u8, state: u8 },
    Analog { id: DeviceId, pin: u8 },
    TxPower { id: DeviceId, power: i32 },
    Ping { id: DeviceId },
    Debug { id: DeviceId, enable: bool },
    Reset { id: DeviceId },
    FactoryReset { id: DeviceId },
    TriggerReport { id: DeviceId },
}

impl Command {
    pub fn hello() -> Self {
        Command::Hello
    }

    pub fn rename(id: DeviceId, name: &str) -> Result<Self, CommandError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyField { field: "name" });
        }
        Ok(Command::Rename {
            id,
            name: name.to_string(),
        })
    }

    pub fn power(id: DeviceId, save: bool) -> Self {
        Command::Power {
            id,
            mode: if save { PowerMode::On } else { PowerMode::Off },
        }
    }

    pub fn deactivate(id: DeviceId) -> Self {
        Command::Deactivate { id }
    }

    pub fn activate(id: DeviceId) -> Self {
        Command::Activate { id }
    }

    pub fn release(id: DeviceId) -> Self {
        Command::Release { id }
    }

    pub fn restore(id: DeviceId) -> Self {
        Command::Restore { id }
    }

    pub fn role(id: DeviceId, role: &str) -> Result<Self, CommandError> {
        let role = role.trim();
        if role.is_empty() {
            return Err(CommandError::EmptyField { field: "role" });
        }
        Ok(Command::Role {
            id,
            role: role.to_string(),
        })
    }

    pub fn reporting(id: DeviceId, interval: u64) -> Result<Self, CommandError> {
        if interval < MIN_REPORTING_INTERVAL_MS {
            return Err(CommandError::IntervalTooShort {
                value: interval,
                min: MIN_REPORTING_INTERVAL_MS,
            });
        }
        Ok(Command::Reporting { id, interval })
    }

    pub fn sleep_duration(id: DeviceId, seconds: u64) -> Result<Self, CommandError> {
        if seconds < MIN_SLEEP_SECONDS {
            return Err(CommandError::SleepTooShort {
                value: seconds,
                min: MIN_SLEEP_SECONDS,
            });
        }
        Ok(Command::SleepDuration { id, seconds })
    }

    pub fn gpio(id: DeviceId, pin: u8, state: u8) -> Self {
        Command::Gpio { id, pin, state }
    }

    pub fn analog(id: DeviceId, pin: u8) -> Self {
        Command::Analog { id, pin }
    }

    pub fn tx_power(id: DeviceId, power: i32) -> Self {
        Command::TxPower { id, power }
    }

    pub fn ping(id: DeviceId) -> Self {
        Command::Ping { id }
    }

    pub fn debug(id: DeviceId, enable: bool) -> Self {
        Command::Debug { id, enable }
    }

    pub fn reset(id: DeviceId) -> Self {
        Command::Reset { id }
    }

    pub fn factory_reset(id: DeviceId) -> Self {
        Command::FactoryReset { id }
    }

    pub fn trigger_report(id: DeviceId) -> Self {
        Command::TriggerReport { id }
    }

    /// Deactivate, release, reset and factory-reset destroy state on the
    /// device or hub side and must pass a confirmation gate first.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Command::Deactivate { .. }
                | Command::Release { .. }
                | Command::Reset { .. }
                | Command::FactoryReset { .. }
        )
    }

    /// Newline-free tagged JSON, one websocket text frame per command.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
