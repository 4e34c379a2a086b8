//! Sensor and battery sampling.

use log::{info, warn};

use crate::{
    clock::Clock,
    config::TimingConfig,
    platform::{AnalogInput, ClimateSensor, PowerSwitch},
    status::SensorReading,
};

/// Raw ADC counts per volt at the battery divider.
pub const RAW_VOLTS_CONVERSION: f32 = 620.5;
pub const SMOOTHING_WEIGHT: f32 = 0.7;

/// Holds the sensor supply on; releases it on every exit path.
struct PoweredSensor<'a> {
    switch: Option<&'a mut dyn PowerSwitch>,
}

impl<'a> PoweredSensor<'a> {
    fn energize(mut switch: Option<&'a mut dyn PowerSwitch>) -> Self {
        if let Some(switch) = switch.as_deref_mut() {
            switch.energize();
        }
        Self { switch }
    }
}

impl Drop for PoweredSensor<'_> {
    fn drop(&mut self) {
        if let Some(switch) = self.switch.as_deref_mut() {
            switch.release();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acquisition {
    pub reading: SensorReading,
    pub attempts: u32,
}

pub fn read_sensor(
    sensor: &mut dyn ClimateSensor,
    power: Option<&mut dyn PowerSwitch>,
    clock: &mut dyn Clock,
    timing: &TimingConfig,
) -> Acquisition {
    let switched = power.is_some();
    let _power = PoweredSensor::energize(power);
    if switched {
        clock.delay_ms(timing.sensor_warmup_ms);
    }

    let max = timing.sensor_attempts.max(1);
    for attempt in 1..=max {
        let sample = sensor.sample();
        if sample.is_valid() {
            info!(
                "sensor read ok on attempt {attempt}: {:.2} C, {:.2} %",
                sample.temperature_c, sample.humidity_pct
            );
            return Acquisition {
                reading: SensorReading {
                    temperature_c: sample.temperature_c,
                    humidity_pct: sample.humidity_pct,
                    success: true,
                },
                attempts: attempt,
            };
        }
        warn!("sensor attempt {attempt}/{max} returned no data");
        if attempt < max {
            clock.delay_ms(timing.sensor_retry_delay_ms);
        }
    }

    Acquisition {
        reading: SensorReading::invalid(),
        attempts: max,
    }
}

pub fn smooth(previous: Option<f32>, new: f32) -> f32 {
    match previous {
        Some(previous) => SMOOTHING_WEIGHT * new + (1.0 - SMOOTHING_WEIGHT) * previous,
        None => new,
    }
}

/// Averages `samples` raw ADC reads, converts to volts and smooths against
/// `previous`. Returns 0 without an input.
pub fn read_battery_voltage(
    adc: Option<&mut dyn AnalogInput>,
    clock: &mut dyn Clock,
    timing: &TimingConfig,
    previous: Option<f32>,
) -> f32 {
    let Some(adc) = adc else {
        return 0.0;
    };

    let samples = timing.battery_samples.max(1);
    let mut total = 0.0_f32;
    let mut taken = 0_u32;
    for index in 0..samples {
        match adc.read_raw() {
            Some(raw) => {
                total += f32::from(raw);
                taken += 1;
            }
            None => warn!("battery adc sample {index} failed"),
        }
        if index + 1 < samples {
            clock.delay_ms(timing.battery_sample_delay_ms);
        }
    }

    if taken == 0 {
        return previous.unwrap_or(0.0);
    }

    let volts = total / taken as f32 / RAW_VOLTS_CONVERSION;
    smooth(previous, volts)
}
