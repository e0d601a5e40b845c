//! Derived per-device presentation state.
//!
//! Everything here is a pure function of the latest snapshot. No timer and
//! no client-side bookkeeping may feed into these values; the hub is the
//! only source of truth for power and wake state.

use crate::{DeviceSnapshot, DeviceStatus};

/// Mutually exclusive power label for a device card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPhase {
    /// The hub has a wake-up queued for the device's next check-in. Only
    /// shown while the device is online, so a stale "waking up" never
    /// survives for a device that has since gone dark.
    WakeUpPending,
    PowerSaving,
    Active,
}

impl PowerPhase {
    pub fn label(self) -> &'static str {
        match self {
            PowerPhase::WakeUpPending => "Waking Up...",
            PowerPhase::PowerSaving => "Power Save ON",
            PowerPhase::Active => "Power Save OFF",
        }
    }
}

/// A non-zero ADC sample and the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalogReading {
    pub channel: usize,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub phase: PowerPhase,
    /// Card dimming state: saving power and not about to wake.
    pub sleeping: bool,
    pub status_label: &'static str,
    pub role_placeholder: Option<String>,
    pub interval_placeholder: Option<String>,
    pub analog: Vec<AnalogReading>,
    pub debug_mode: bool,
}

impl DeviceView {
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        let phase = if snapshot.wake_up_pending && snapshot.status == DeviceStatus::Online {
            PowerPhase::WakeUpPending
        } else if snapshot.is_power_save {
            PowerPhase::PowerSaving
        } else {
            PowerPhase::Active
        };

        let role_placeholder = snapshot
            .device_role
            .as_deref()
            .map(|role| format!("Device role (current: {role})"));
        let interval_placeholder = snapshot
            .reporting_interval
            .map(|interval| format!("Report interval (current: {interval}ms)"));

        let analog = snapshot
            .analog_readings
            .iter()
            .enumerate()
            .filter(|(_, value)| **value > 0)
            .map(|(channel, value)| AnalogReading {
                channel,
                value: *value,
            })
            .collect();

        Self {
            phase,
            sleeping: snapshot.is_power_save && !snapshot.wake_up_pending,
            status_label: snapshot.status.as_str(),
            role_placeholder,
            interval_placeholder,
            analog,
            debug_mode: snapshot.debug_mode,
        }
    }
}
