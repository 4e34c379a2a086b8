use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::link::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_client_id: String,
    pub topic_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_client_id: "roomnode".to_string(),
            topic_prefix: "home/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub wifi_attempts: u32,
    pub wifi_backoff_ms: u64,
    pub broker_attempts: u32,
    pub broker_backoff_ms: u64,
    pub sensor_attempts: u32,
    pub sensor_retry_delay_ms: u32,
    pub sensor_warmup_ms: u32,
    pub battery_samples: u32,
    pub battery_sample_delay_ms: u32,
    pub publish_settle_ms: u32,
    pub cycle_flush_ms: u32,
    pub idle_poll_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wifi_attempts: 5,
            wifi_backoff_ms: 3_000,
            broker_attempts: 5,
            broker_backoff_ms: 3_000,
            sensor_attempts: 5,
            sensor_retry_delay_ms: 200,
            sensor_warmup_ms: 2_000,
            battery_samples: 10,
            battery_sample_delay_ms: 50,
            publish_settle_ms: 100,
            cycle_flush_ms: 1_000,
            idle_poll_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.wifi_attempts = self.wifi_attempts.clamp(1, 50);
        self.broker_attempts = self.broker_attempts.clamp(1, 50);
        self.sensor_attempts = self.sensor_attempts.clamp(1, 20);
        self.battery_samples = self.battery_samples.clamp(1, 64);
        self.idle_poll_ms = self.idle_poll_ms.clamp(10, 1_000);
    }

    pub fn wifi_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.wifi_attempts,
            backoff: Duration::from_millis(self.wifi_backoff_ms),
        }
    }

    pub fn broker_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.broker_attempts,
            backoff: Duration::from_millis(self.broker_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub console: bool,
    pub broker: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            console: true,
            broker: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub version_path: String,
    pub bin_path: String,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "192.168.1.100".to_string(),
            port: 80,
            version_path: "/version.txt".to_string(),
            bin_path: "/firmware.bin".to_string(),
        }
    }
}

impl OtaConfig {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    pub ntp_server: String,
    pub utc_offset_secs: i32,
    pub dst_offset_secs: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org".to_string(),
            utc_offset_secs: 7_200,
            dst_offset_secs: 3_600,
        }
    }
}

impl ClockConfig {
    pub fn total_offset_secs(&self) -> i32 {
        self.utc_offset_secs.saturating_add(self.dst_offset_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.timing.sanitize();
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
        if self.ota.port == 0 {
            self.ota.port = 80;
        }
        for path in [&mut self.ota.version_path, &mut self.ota.bin_path] {
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let timing = TimingConfig::default();
        assert_eq!(timing.wifi_policy().max_attempts, 5);
        assert_eq!(timing.wifi_policy().backoff, Duration::from_secs(3));
        assert_eq!(timing.broker_policy().max_attempts, 5);
        assert_eq!(timing.sensor_attempts, 5);
        assert_eq!(timing.sensor_retry_delay_ms, 200);
        assert_eq!(timing.sensor_warmup_ms, 2_000);
        assert_eq!(timing.battery_samples, 10);
    }

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut runtime = RuntimeConfig::default();
        runtime.timing.wifi_attempts = 0;
        runtime.timing.sensor_attempts = 0;
        runtime.network.mqtt_port = 0;
        runtime.ota.bin_path = "fw.bin".to_string();

        runtime.sanitize();

        assert_eq!(runtime.timing.wifi_attempts, 1);
        assert_eq!(runtime.timing.sensor_attempts, 1);
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.ota.bin_path, "/fw.bin");
    }

    #[test]
    fn partial_json_fills_sections_with_defaults() {
        let json = r#"{"network":{"wifi_ssid":"attic","wifi_pass":"pw","mqtt_host":"broker",
            "mqtt_port":1883,"mqtt_user":"u","mqtt_pass":"p","mqtt_client_id":"n1",
            "topic_prefix":""}}"#;
        let runtime: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(runtime.network.wifi_ssid, "attic");
        assert!(runtime.diagnostics.broker);
        assert_eq!(runtime.ota.url("/version.txt"), "http://192.168.1.100:80/version.txt");
    }
}
