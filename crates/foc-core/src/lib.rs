use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod command;
pub mod view;

pub use command::{Command, CommandError, PowerMode};
pub use view::{AnalogReading, DeviceView, PowerPhase};

/// Stable device identifier. The hub sends ids as either JSON strings or
/// numbers depending on firmware; both normalize to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for DeviceId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(DeviceId(s)),
            serde_json::Value::Number(n) => Ok(DeviceId(n.to_string())),
            _ => Err(serde::de::Error::custom("expected string or number for id")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "Online",
            DeviceStatus::Offline => "Offline",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "online" => Ok(DeviceStatus::Online),
            "offline" => Ok(DeviceStatus::Offline),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// One device as reported by the hub. Authoritative: the client never
/// computes status or power state itself. A zero in `analog_readings`
/// means "no reading on that channel".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub counter: u64,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub is_power_save: bool,
    #[serde(default)]
    pub wake_up_pending: bool,
    #[serde(default)]
    pub device_role: Option<String>,
    #[serde(default)]
    pub reporting_interval: Option<u64>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub analog_readings: Vec<i64>,
    #[serde(default)]
    pub ping_response: Option<bool>,
}

/// The full authoritative payload: every active and queued device the hub
/// currently knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetBatch {
    #[serde(default)]
    pub active: Vec<DeviceSnapshot>,
    #[serde(default)]
    pub queued: Vec<DeviceSnapshot>,
}

#[derive(Deserialize)]
struct RawBatch {
    #[serde(default)]
    active: Option<Vec<DeviceSnapshot>>,
    #[serde(default)]
    queued: Option<Vec<DeviceSnapshot>>,
}

impl FleetBatch {
    /// Discriminates fleet batches from other hub traffic by key presence:
    /// a payload carrying neither `active` nor `queued` is an ack and
    /// returns `None`, as does anything that fails to parse.
    pub fn parse(raw: &str) -> Option<FleetBatch> {
        let raw: RawBatch = serde_json::from_str(raw).ok()?;
        if raw.active.is_none() && raw.queued.is_none() {
            return None;
        }
        Some(FleetBatch {
            active: raw.active.unwrap_or_default(),
            queued: raw.queued.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accepts_string_and_number() {
        let from_string: DeviceId = serde_json::from_str("\"7\"").expect("string id");
        let from_number: DeviceId = serde_json::from_str("7").expect("numeric id");
        assert_eq!(from_string, from_number);
        assert_eq!(from_string.as_str(), "7");

        let bad: Result<DeviceId, _> = serde_json::from_str("[7]");
        assert!(bad.is_err());
    }

    #[test]
    fn snapshot_parses_camel_case_wire_names() {
        let snapshot: DeviceSnapshot = serde_json::from_str(
            r#"{
                "id": 3,
                "name": "Lab Node",
                "counter": 42,
                "status": "Online",
                "isPowerSave": true,
                "wakeUpPending": false,
                "deviceRole": "sensor",
                "reportingInterval": 1500,
                "debugMode": true,
                "analogReadings": [0, 512, 0, 77],
                "pingResponse": true
            }"#,
        )
        .expect("parse snapshot");

        assert_eq!(snapshot.id, DeviceId::from(3u64));
        assert_eq!(snapshot.status, DeviceStatus::Online);
        assert!(snapshot.is_power_save);
        assert_eq!(snapshot.device_role.as_deref(), Some("sensor"));
        assert_eq!(snapshot.reporting_interval, Some(1500));
        assert_eq!(snapshot.analog_readings, vec![0, 512, 0, 77]);
        assert_eq!(snapshot.ping_response, Some(true));
    }

    #[test]
    fn snapshot_tolerates_missing_optional_fields() {
        let snapshot: DeviceSnapshot =
            serde_json::from_str(r#"{"id": "9", "name": "Bare", "counter": 1, "status": "Offline"}"#)
                .expect("parse minimal snapshot");
        assert!(!snapshot.is_power_save);
        assert!(!snapshot.wake_up_pending);
        assert!(snapshot.device_role.is_none());
        assert!(snapshot.analog_readings.is_empty());
    }

    #[test]
    fn batch_discrimination_by_key_presence() {
        assert!(FleetBatch::parse(r#"{"active": [], "queued": []}"#).is_some());
        assert!(FleetBatch::parse(r#"{"active": []}"#).is_some());
        assert!(FleetBatch::parse(r#"{"queued": []}"#).is_some());

        // acks and unrelated traffic
        assert!(FleetBatch::parse(r#"{"ok": true}"#).is_none());
        assert!(FleetBatch::parse("\"pong\"").is_none());
        assert!(FleetBatch::parse("not json").is_none());
    }

    #[test]
    fn batch_defaults_missing_category_to_empty() {
        let batch = FleetBatch::parse(
            r#"{"active": [{"id": 1, "name": "a", "counter": 0, "status": "Online"}]}"#,
        )
        .expect("batch");
        assert_eq!(batch.active.len(), 1);
        assert!(batch.queued.is_empty());
    }

    #[test]
    fn status_round_trips_and_parses_loosely() {
        assert_eq!("online".parse::<DeviceStatus>(), Ok(DeviceStatus::Online));
        assert_eq!(" OFFLINE ".parse::<DeviceStatus>(), Ok(DeviceStatus::Offline));
        assert!("sleeping".parse::<DeviceStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&DeviceStatus::Online).expect("serialize"),
            "\"Online\""
        );
    }
}
