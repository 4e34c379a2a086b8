//! Reading publication and the diagnostic channel.

use log::{info, warn};

use crate::{
    clock::Clock,
    config::DiagnosticsConfig,
    error::LinkError,
    persist::PersistentState,
    platform::BrokerLink,
    status::{format_measurement, SensorReading},
    topics::TopicSet,
};

#[derive(Debug, Clone)]
pub struct Reporter {
    topics: TopicSet,
    diagnostics: DiagnosticsConfig,
    prefix: String,
    settle_ms: u32,
}

impl Reporter {
    pub fn new(
        topics: TopicSet,
        diagnostics: DiagnosticsConfig,
        firmware_version: &str,
        settle_ms: u32,
    ) -> Self {
        Self {
            topics,
            diagnostics,
            prefix: format!("[v{firmware_version}] "),
            settle_ms,
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    fn publish(
        &self,
        broker: &mut dyn BrokerLink,
        clock: &mut dyn Clock,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), LinkError> {
        let result = broker.publish(topic, payload.as_bytes(), retain);
        clock.delay_ms(self.settle_ms);
        result
    }

    /// Temperature and humidity go out as separate non-retained messages,
    /// followed by the battery voltage when one was measured.
    pub fn publish_reading(
        &self,
        broker: &mut dyn BrokerLink,
        clock: &mut dyn Clock,
        reading: &SensorReading,
        voltage: Option<f32>,
    ) -> Result<(), LinkError> {
        self.publish(
            broker,
            clock,
            self.topics.temperature(),
            &format_measurement(reading.temperature_c),
            false,
        )?;
        self.publish(
            broker,
            clock,
            self.topics.humidity(),
            &format_measurement(reading.humidity_pct),
            false,
        )?;
        if let Some(volts) = voltage {
            self.publish(
                broker,
                clock,
                self.topics.battery(),
                &format_measurement(volts),
                false,
            )?;
        }
        Ok(())
    }

    /// Never fails: a diagnostic that cannot reach the broker is dropped.
    pub fn diagnostic(
        &self,
        broker: &mut dyn BrokerLink,
        clock: &mut dyn Clock,
        message: &str,
        retain: bool,
    ) {
        let line = format!("{}{message}", self.prefix);

        if self.diagnostics.broker && broker.is_connected() {
            if let Err(err) = self.publish(broker, clock, self.topics.diagnostics(), &line, retain) {
                warn!("diagnostic publish failed: {err}");
            }
        }
        if self.diagnostics.console {
            info!("{line}");
        }
    }

    /// Console-only progress line, used while the broker is not reachable.
    pub fn console(&self, message: &str) {
        if self.diagnostics.console {
            info!("{}{message}", self.prefix);
        }
    }
}

/// Battery voltages shown in the cycle summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySummary {
    pub current: f32,
    pub previous: f32,
}

pub fn cycle_summary(
    timestamp: &str,
    reading: &SensorReading,
    battery: Option<BatterySummary>,
    state: &PersistentState,
) -> String {
    let mut summary = format!(
        "{timestamp} | T: {:.1} | H: {:.0}",
        reading.temperature_c, reading.humidity_pct
    );
    if let Some(battery) = battery {
        summary.push_str(&format!(
            " | Bat: {:.2}V/{:.2}V",
            battery.current, battery.previous
        ));
    }
    summary.push_str(&format!(
        " | Boot: {} | Success: {}",
        state.boot_count, state.success_count
    ));
    summary
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fakes::{FakeClock, FakeLink};

    fn reporter(diagnostics: DiagnosticsConfig) -> Reporter {
        Reporter::new(TopicSet::derive("home/", "garden"), diagnostics, "1.2.0", 100)
    }

    fn reading() -> SensorReading {
        SensorReading {
            temperature_c: 21.4,
            humidity_pct: 48.25,
            success: true,
        }
    }

    #[test]
    fn publishes_reading_with_two_decimals_and_settle_delay() {
        let mut broker = FakeLink::connected("mqtt");
        let mut clock = FakeClock::default();

        reporter(DiagnosticsConfig::default())
            .publish_reading(&mut broker, &mut clock, &reading(), Some(3.987))
            .unwrap();

        assert_eq!(
            broker.published_text(),
            vec![
                ("home/garden/tempset-ambient/set".to_string(), "21.40".to_string(), false),
                ("home/garden/tempset-humidity/set".to_string(), "48.25".to_string(), false),
                ("home/garden/battery/set".to_string(), "3.99".to_string(), false),
            ]
        );
        assert_eq!(clock.delays, vec![100, 100, 100]);
    }

    #[test]
    fn reading_publish_fails_when_broker_is_down() {
        let mut broker = FakeLink::new("mqtt");
        let mut clock = FakeClock::default();

        let result =
            reporter(DiagnosticsConfig::default()).publish_reading(&mut broker, &mut clock, &reading(), None);

        assert_eq!(result, Err(LinkError::NotConnected));
    }

    #[test]
    fn diagnostic_is_prefixed_with_version() {
        let mut broker = FakeLink::connected("mqtt");
        let mut clock = FakeClock::default();

        reporter(DiagnosticsConfig::default()).diagnostic(&mut broker, &mut clock, "hello", true);

        assert_eq!(
            broker.published_text(),
            vec![("home/garden/debug".to_string(), "[v1.2.0] hello".to_string(), true)]
        );
    }

    #[test]
    fn broker_toggle_suppresses_publish_only() {
        let mut broker = FakeLink::connected("mqtt");
        let mut clock = FakeClock::default();
        let diagnostics = DiagnosticsConfig {
            console: true,
            broker: false,
        };

        reporter(diagnostics).diagnostic(&mut broker, &mut clock, "quiet", false);

        assert!(broker.published.is_empty());
        assert!(clock.delays.is_empty());
    }

    #[test]
    fn disconnected_broker_skips_diagnostic_publish() {
        let mut broker = FakeLink::new("mqtt");
        let mut clock = FakeClock::default();

        reporter(DiagnosticsConfig::default()).diagnostic(&mut broker, &mut clock, "offline", true);

        assert!(broker.published.is_empty());
    }

    #[test]
    fn summary_includes_battery_and_counters() {
        let state = PersistentState {
            boot_count: 7,
            success_count: 5,
            last_voltage: 4.01,
        };
        let summary = cycle_summary(
            "05/01/26 11:00:00",
            &reading(),
            Some(BatterySummary {
                current: 3.981,
                previous: 4.01,
            }),
            &state,
        );

        assert_eq!(
            summary,
            "05/01/26 11:00:00 | T: 21.4 | H: 48 | Bat: 3.98V/4.01V | Boot: 7 | Success: 5"
        );
    }

    #[test]
    fn summary_omits_battery_on_mains() {
        let summary = cycle_summary("Time Error", &reading(), None, &PersistentState::COLD);
        assert_eq!(summary, "Time Error | T: 21.4 | H: 48 | Boot: 0 | Success: 0");
    }
}
