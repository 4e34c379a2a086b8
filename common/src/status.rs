use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

pub const UNKNOWN: &str = "unknown";

/// Result of one acquisition; NaN until a read succeeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub success: bool,
}

impl SensorReading {
    pub fn invalid() -> Self {
        Self {
            temperature_c: f32::NAN,
            humidity_pct: f32::NAN,
            success: false,
        }
    }
}

pub fn format_measurement(value: f32) -> String {
    format!("{value:.2}")
}

/// What the status page shows between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastKnownReading {
    pub temperature: String,
    pub humidity: String,
    pub voltage: String,
    pub timestamp: String,
}

impl Default for LastKnownReading {
    fn default() -> Self {
        Self {
            temperature: UNKNOWN.to_string(),
            humidity: UNKNOWN.to_string(),
            voltage: UNKNOWN.to_string(),
            timestamp: UNKNOWN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub hardware_id: String,
    pub room_name: String,
    pub display_name: String,
    pub firmware_version: String,
    pub battery_powered: bool,
    pub last: LastKnownReading,
    pub boot_count: u32,
    pub success_count: u32,
}

impl StatusSnapshot {
    pub fn new(
        hardware_id: impl Into<String>,
        room_name: impl Into<String>,
        display_name: impl Into<String>,
        firmware_version: impl Into<String>,
        battery_powered: bool,
    ) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            room_name: room_name.into(),
            display_name: display_name.into(),
            firmware_version: firmware_version.into(),
            battery_powered,
            last: LastKnownReading::default(),
            boot_count: 0,
            success_count: 0,
        }
    }

    /// Only successful cycles overwrite the cached values.
    pub fn record_success(&mut self, reading: &SensorReading, voltage: Option<f32>, timestamp: &str) {
        if !reading.success {
            return;
        }
        self.last.temperature = format_measurement(reading.temperature_c);
        self.last.humidity = format_measurement(reading.humidity_pct);
        if let Some(volts) = voltage {
            self.last.voltage = format_measurement(volts);
        }
        self.last.timestamp = timestamp.to_string();
    }

    pub fn data_payload(&self, uptime: String) -> DataPayload {
        DataPayload {
            temperature: self.last.temperature.clone(),
            humidity: self.last.humidity.clone(),
            voltage: self.last.voltage.clone(),
            time: self.last.timestamp.clone(),
            uptime,
        }
    }
}

/// Body of `GET /data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataPayload {
    pub temperature: String,
    pub humidity: String,
    pub voltage: String,
    pub time: String,
    pub uptime: String,
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

pub fn shared(snapshot: StatusSnapshot) -> SharedStatus {
    Arc::new(Mutex::new(snapshot))
}

/// A poisoned lock still holds a usable snapshot.
pub fn lock(status: &SharedStatus) -> MutexGuard<'_, StatusSnapshot> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot::new("AA", "lounge", "Lounge", "1.2.0", false)
    }

    #[test]
    fn starts_with_unknown_values() {
        let status = snapshot();
        assert_eq!(status.last, LastKnownReading::default());
        assert_eq!(
            status.data_payload("00:00:05".into()),
            DataPayload {
                temperature: "unknown".into(),
                humidity: "unknown".into(),
                voltage: "unknown".into(),
                time: "unknown".into(),
                uptime: "00:00:05".into(),
            }
        );
    }

    #[test]
    fn failed_reading_never_overwrites_cache() {
        let mut status = snapshot();
        let good = SensorReading {
            temperature_c: 21.456,
            humidity_pct: 48.0,
            success: true,
        };
        status.record_success(&good, None, "05/01/26 11:00:00");
        status.record_success(&SensorReading::invalid(), None, "05/01/26 11:00:30");

        assert_eq!(status.last.temperature, "21.46");
        assert_eq!(status.last.humidity, "48.00");
        assert_eq!(status.last.voltage, "unknown");
        assert_eq!(status.last.timestamp, "05/01/26 11:00:00");
    }

    #[test]
    fn payload_serializes_with_expected_keys() {
        let json = serde_json::to_value(snapshot().data_payload("1d 00:00:00".into())).unwrap();
        for key in ["temperature", "humidity", "voltage", "time", "uptime"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
