use std::time::Duration;

use chrono::{DateTime, FixedOffset};

pub const TIME_ERROR: &str = "Time Error";

/// Monotonic millisecond counter that wraps at `u32::MAX`.
pub trait Clock {
    fn now_ms(&self) -> u32;

    fn uptime(&self) -> Duration;

    fn delay_ms(&mut self, ms: u32);
}

pub trait WallClock {
    /// Seconds since the Unix epoch, or `None` before time sync.
    fn now_epoch_secs(&mut self) -> Option<i64>;
}

pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// A wait bounded by wall-clock time, measured on a wrapping counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWindow {
    pub started_ms: u32,
    pub length_ms: u32,
}

impl IdleWindow {
    pub fn new(started_ms: u32, length_ms: u32) -> Self {
        Self {
            started_ms,
            length_ms,
        }
    }

    pub fn expired(&self, now: u32) -> bool {
        elapsed_ms(now, self.started_ms) >= self.length_ms
    }

    pub fn remaining_ms(&self, now: u32) -> u32 {
        self.length_ms
            .saturating_sub(elapsed_ms(now, self.started_ms))
    }
}

pub fn format_timestamp(epoch_secs: i64, offset_secs: i32) -> String {
    let Some(offset) = FixedOffset::east_opt(offset_secs) else {
        return TIME_ERROR.to_string();
    };
    match DateTime::from_timestamp(epoch_secs, 0) {
        Some(utc) => utc
            .with_timezone(&offset)
            .format("%d/%m/%y %H:%M:%S")
            .to_string(),
        None => TIME_ERROR.to_string(),
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}
