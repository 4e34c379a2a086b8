//! Connection supervision shared by the WiFi and broker links.

use std::time::Duration;

use log::{info, warn};

use crate::{clock::Clock, platform::Link};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    fn backoff_ms(&self) -> u32 {
        u32::try_from(self.backoff.as_millis()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// `attempt` is the most recent attempt, counted from 1.
    Connecting { attempt: u32 },
    Connected,
    Failed { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    AttemptStarted,
    AttemptSucceeded,
    AttemptFailed,
    Dropped,
}

impl LinkState {
    pub fn on(self, event: LinkEvent, policy: &RetryPolicy) -> Self {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            (Disconnected | Failed { .. }, AttemptStarted) => Connecting { attempt: 1 },
            (Connecting { attempt }, AttemptStarted) => Connecting {
                attempt: attempt.saturating_add(1),
            },
            (Connecting { .. }, AttemptSucceeded) => Connected,
            (Connecting { attempt }, AttemptFailed) if attempt >= policy.max_attempts => {
                Failed { attempts: attempt }
            }
            (Connecting { .. }, AttemptFailed) => self,
            (Connected, Dropped) => Disconnected,
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    pub attempts: u32,
}

/// Tracks one link across cycles and drives its reconnect loop.
#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    state: LinkState,
    policy: RetryPolicy,
}

impl LinkSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            policy,
        }
    }

    fn apply(&mut self, event: LinkEvent) {
        self.state = self.state.on(event, &self.policy);
    }

    /// Returns the number of attempts spent; 0 when the link was already up.
    pub fn ensure_connected<L: Link + ?Sized>(
        &mut self,
        link: &mut L,
        clock: &mut dyn Clock,
    ) -> Result<u32, Exhausted> {
        if link.is_connected() {
            self.state = LinkState::Connected;
            return Ok(0);
        }

        if self.state == LinkState::Connected {
            warn!("{} link dropped", link.name());
            self.apply(LinkEvent::Dropped);
        }

        let max = self.policy.max_attempts.max(1);
        for attempt in 1..=max {
            self.apply(LinkEvent::AttemptStarted);
            info!("{}: connecting (attempt {attempt}/{max})", link.name());

            match link.connect() {
                Ok(()) => {
                    self.apply(LinkEvent::AttemptSucceeded);
                    match link.address() {
                        Some(address) => info!("{} connected: {address}", link.name()),
                        None => info!("{} connected", link.name()),
                    }
                    return Ok(attempt);
                }
                Err(err) => {
                    warn!("{} attempt {attempt} failed: {err}", link.name());
                    self.apply(LinkEvent::AttemptFailed);
                    if attempt < max {
                        link.disconnect();
                        clock.delay_ms(self.policy.backoff_ms());
                    }
                }
            }
        }

        warn!("{} unavailable after {max} attempts", link.name());
        self.state = LinkState::Failed { attempts: max };
        Err(Exhausted { attempts: max })
    }

    pub fn mark_disconnected(&mut self) {
        self.apply(LinkEvent::Dropped);
    }
}
