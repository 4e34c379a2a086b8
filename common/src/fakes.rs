//! Deterministic stand-ins for every capability trait.

use std::{collections::VecDeque, io::Cursor, time::Duration};

use crate::{
    clock::{Clock, WallClock},
    error::{LinkError, UpdateError},
    platform::{
        AnalogInput, BrokerLink, ClimateSensor, Link, NetworkLink, PowerSwitch, RawSample,
        ServiceSurface, StatusLed, SurfacePoll, Watchdog,
    },
    update::{Download, IoReader, UpdateSource, UpdateTarget},
};

#[derive(Debug, Default)]
pub struct FakeClock {
    pub now: u32,
    pub uptime_ms: u64,
    pub delays: Vec<u32>,
}

impl FakeClock {
    pub fn starting_at(now: u32) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn total_delay_ms(&self) -> u64 {
        self.delays.iter().map(|ms| u64::from(*ms)).sum()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.now
    }

    fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
        self.uptime_ms += u64::from(ms);
        self.delays.push(ms);
    }
}

pub struct FakeWallClock(pub Option<i64>);

impl WallClock for FakeWallClock {
    fn now_epoch_secs(&mut self) -> Option<i64> {
        self.0
    }
}

#[derive(Debug)]
pub struct FakeLink {
    pub name: &'static str,
    pub connected: bool,
    pub script: VecDeque<Result<(), LinkError>>,
    pub fallback: Result<(), LinkError>,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub published: Vec<(String, Vec<u8>, bool)>,
}

impl FakeLink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connected: false,
            script: VecDeque::new(),
            fallback: Ok(()),
            connect_calls: 0,
            disconnect_calls: 0,
            published: Vec::new(),
        }
    }

    pub fn connected(name: &'static str) -> Self {
        Self {
            connected: true,
            ..Self::new(name)
        }
    }

    pub fn unreachable(name: &'static str) -> Self {
        Self {
            fallback: Err(LinkError::Refused("unreachable".to_string())),
            ..Self::new(name)
        }
    }

    pub fn script_failures(&mut self, count: usize) {
        for _ in 0..count {
            self.script
                .push_back(Err(LinkError::Refused("scripted".to_string())));
        }
    }

    pub fn published_text(&self) -> Vec<(String, String, bool)> {
        self.published
            .iter()
            .map(|(topic, payload, retain)| {
                (
                    topic.clone(),
                    String::from_utf8_lossy(payload).into_owned(),
                    *retain,
                )
            })
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> usize {
        self.published.iter().filter(|(t, _, _)| t == topic).count()
    }
}

impl Link for FakeLink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.connect_calls += 1;
        let result = self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.connected = result.is_ok();
        result
    }

    fn disconnect(&mut self) {
        self.disconnect_calls += 1;
        self.connected = false;
    }
}

impl NetworkLink for FakeLink {}

impl BrokerLink for FakeLink {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }
}

pub struct FakeSensor {
    pub script: VecDeque<RawSample>,
    pub fallback: RawSample,
    pub reads: u32,
}

impl FakeSensor {
    pub fn scripted(samples: impl IntoIterator<Item = RawSample>) -> Self {
        Self {
            script: samples.into_iter().collect(),
            fallback: RawSample::FAILED,
            reads: 0,
        }
    }

    pub fn steady(temperature_c: f32, humidity_pct: f32) -> Self {
        Self {
            fallback: RawSample {
                temperature_c,
                humidity_pct,
            },
            ..Self::scripted([])
        }
    }

    pub fn failing() -> Self {
        Self::scripted([])
    }
}

impl ClimateSensor for FakeSensor {
    fn sample(&mut self) -> RawSample {
        self.reads += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

#[derive(Debug, Default)]
pub struct FakePower {
    pub energized: bool,
    pub energize_calls: u32,
    pub release_calls: u32,
}

impl PowerSwitch for FakePower {
    fn energize(&mut self) {
        self.energized = true;
        self.energize_calls += 1;
    }

    fn release(&mut self) {
        self.energized = false;
        self.release_calls += 1;
    }
}

pub struct FakeAdc {
    pub value: Option<u16>,
    pub reads: u32,
}

impl FakeAdc {
    pub fn constant(raw: u16) -> Self {
        Self {
            value: Some(raw),
            reads: 0,
        }
    }
}

impl AnalogInput for FakeAdc {
    fn read_raw(&mut self) -> Option<u16> {
        self.reads += 1;
        self.value
    }
}

#[derive(Debug, Default)]
pub struct FakeLed {
    pub states: Vec<bool>,
}

impl StatusLed for FakeLed {
    fn set(&mut self, on: bool) {
        self.states.push(on);
    }
}

#[derive(Debug, Default)]
pub struct FakeWatchdog {
    pub feeds: u32,
}

impl Watchdog for FakeWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}

#[derive(Debug, Default)]
pub struct FakeSurface {
    pub running: bool,
    pub start_calls: u32,
    pub polls: u32,
    pub fail_start: bool,
    /// Requests a restart on this poll, counted from 1.
    pub restart_on_poll: Option<u32>,
}

impl ServiceSurface for FakeSurface {
    fn start(&mut self) -> Result<(), String> {
        self.start_calls += 1;
        if self.fail_start {
            return Err("bind failed".to_string());
        }
        self.running = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn poll(&mut self) -> SurfacePoll {
        self.polls += 1;
        match self.restart_on_poll {
            Some(at) if self.polls >= at => SurfacePoll::RestartRequested,
            _ => SurfacePoll::Idle,
        }
    }
}

pub struct FakeUpdateSource {
    pub version: Result<String, UpdateError>,
    pub image: Vec<u8>,
    pub declared_length: Option<usize>,
    pub fetched: Vec<String>,
    pub opened: Vec<String>,
}

impl FakeUpdateSource {
    pub fn new(version: &str, image: Vec<u8>) -> Self {
        Self {
            version: Ok(version.to_string()),
            declared_length: Some(image.len()),
            image,
            fetched: Vec::new(),
            opened: Vec::new(),
        }
    }

    pub fn failing(err: UpdateError) -> Self {
        Self {
            version: Err(err),
            ..Self::new("", Vec::new())
        }
    }
}

impl UpdateSource for FakeUpdateSource {
    fn fetch_text(&mut self, path: &str) -> Result<String, UpdateError> {
        self.fetched.push(path.to_string());
        self.version.clone()
    }

    fn open(&mut self, path: &str) -> Result<Download<'_>, UpdateError> {
        self.opened.push(path.to_string());
        Ok(Download {
            content_length: self.declared_length,
            body: Box::new(IoReader(Cursor::new(self.image.clone()))),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeUpdateTarget {
    pub began: bool,
    pub staged: Vec<u8>,
    pub finalized: bool,
    pub aborted: bool,
    pub fail_write_after: Option<usize>,
    pub max_write: Option<usize>,
}

impl UpdateTarget for FakeUpdateTarget {
    fn begin(&mut self, _expected_size: Option<usize>) -> Result<(), UpdateError> {
        self.began = true;
        self.staged.clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, UpdateError> {
        if !self.began {
            return Err(UpdateError::Write("not begun".to_string()));
        }
        if self
            .fail_write_after
            .is_some_and(|limit| self.staged.len() >= limit)
        {
            return Err(UpdateError::Write("flash write failed".to_string()));
        }
        let accepted = chunk.len().min(self.max_write.unwrap_or(usize::MAX));
        self.staged.extend_from_slice(&chunk[..accepted]);
        Ok(accepted)
    }

    fn finalize(&mut self) -> Result<(), UpdateError> {
        self.finalized = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}
