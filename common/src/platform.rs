//! Narrow capability interfaces for the hardware the node drives.
//!
//! The esp32 build implements these on top of esp-idf drivers, the host build
//! on simulators, and the tests on deterministic fakes.

use crate::error::LinkError;

pub trait Link {
    fn name(&self) -> &'static str;

    fn is_connected(&mut self) -> bool;

    fn connect(&mut self) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    fn address(&self) -> Option<String> {
        None
    }
}

pub trait NetworkLink: Link {}

pub trait BrokerLink: Link {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError>;
}

/// One raw sensor sample; failed reads report NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl RawSample {
    pub const FAILED: Self = Self {
        temperature_c: f32::NAN,
        humidity_pct: f32::NAN,
    };

    pub fn is_valid(&self) -> bool {
        !self.temperature_c.is_nan() && !self.humidity_pct.is_nan()
    }
}

pub trait ClimateSensor {
    fn sample(&mut self) -> RawSample;
}

pub trait PowerSwitch {
    fn energize(&mut self);

    fn release(&mut self);
}

pub trait AnalogInput {
    fn read_raw(&mut self) -> Option<u16>;
}

pub trait StatusLed {
    fn set(&mut self, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePoll {
    Idle,
    RestartRequested,
}

/// The passive HTTP surface. Started once, then polled from the idle loop.
pub trait ServiceSurface {
    fn start(&mut self) -> Result<(), String>;

    fn is_running(&self) -> bool;

    fn poll(&mut self) -> SurfacePoll;
}

pub trait Watchdog {
    fn feed(&mut self);
}
