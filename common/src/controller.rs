//! The measurement cycle and what happens between cycles.
//!
//! One cycle walks `ConnectNetwork -> ConnectBroker -> Measure -> Report ->
//! CheckUpdate -> Finish`. Every phase either names the next phase or ends
//! the cycle with a [`NextStep`]; failures never escape a cycle.

use log::{info, warn};

use crate::{
    acquisition::{read_battery_voltage, read_sensor},
    board::{BoardConfig, PowerMode},
    clock::{format_timestamp, Clock, IdleWindow, WallClock, TIME_ERROR},
    config::RuntimeConfig,
    error::CycleFailure,
    indicator::Indicator,
    link::LinkSupervisor,
    persist::PersistentState,
    platform::{
        AnalogInput, BrokerLink, ClimateSensor, NetworkLink, PowerSwitch, ServiceSurface,
        SurfacePoll, Watchdog,
    },
    report::{cycle_summary, BatterySummary, Reporter},
    status::{lock, SensorReading, SharedStatus},
    topics::TopicSet,
    update::{check_for_update, UpdateGate, UpdateOutcome, UpdateSource, UpdateTarget},
};

pub struct UpdateIo<'a> {
    pub source: &'a mut dyn UpdateSource,
    pub target: &'a mut dyn UpdateTarget,
    /// Shared with the HTTP upload handler.
    pub gate: &'a UpdateGate,
}

/// Everything a cycle touches, borrowed from the platform for its duration.
pub struct NodeIo<'a> {
    pub network: &'a mut dyn NetworkLink,
    pub broker: &'a mut dyn BrokerLink,
    pub sensor: &'a mut dyn ClimateSensor,
    pub sensor_power: Option<&'a mut dyn PowerSwitch>,
    pub battery: Option<&'a mut dyn AnalogInput>,
    pub clock: &'a mut dyn Clock,
    pub wall_clock: &'a mut dyn WallClock,
    pub surface: Option<&'a mut dyn ServiceSurface>,
    pub updates: Option<UpdateIo<'a>>,
    pub led: Option<Indicator<'a>>,
    pub watchdog: Option<&'a mut dyn Watchdog>,
}

impl NodeIo<'_> {
    fn show_led(&mut self, on: bool) {
        if let Some(led) = self.led.as_mut() {
            led.show(on);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    ConnectNetwork,
    ConnectBroker,
    Measure,
    Report,
    CheckUpdate,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Suspend { seconds: u32 },
    Idle { window: IdleWindow },
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Suspend,
    Restart,
    IdleUntilNextCycle,
}

pub fn escalate(mode: PowerMode, failure: CycleFailure) -> Escalation {
    match (mode, failure) {
        (PowerMode::Battery, _) => Escalation::Suspend,
        (PowerMode::Mains, CycleFailure::BrokerExhausted { .. }) => Escalation::Restart,
        (PowerMode::Mains, _) => Escalation::IdleUntilNextCycle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    pub next: NextStep,
    pub failure: Option<CycleFailure>,
    pub reading: SensorReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleExit {
    CycleDue,
    Restart,
}

/// How a run of cycles ends; both leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Suspend { seconds: u32 },
    Restart,
}

enum Step {
    Next(CyclePhase),
    Done(NextStep),
}

struct CycleContext {
    started_ms: u32,
    timestamp: String,
    reading: SensorReading,
    battery: Option<BatterySummary>,
    failure: Option<CycleFailure>,
}

pub struct Controller {
    board: &'static BoardConfig,
    runtime: RuntimeConfig,
    firmware_version: String,
    reporter: Reporter,
    network: LinkSupervisor,
    broker: LinkSupervisor,
    state: PersistentState,
    status: SharedStatus,
}

impl Controller {
    pub fn new(
        board: &'static BoardConfig,
        runtime: RuntimeConfig,
        firmware_version: &str,
        state: PersistentState,
        status: SharedStatus,
    ) -> Self {
        let topics = TopicSet::derive(&runtime.network.topic_prefix, board.room_name);
        let reporter = Reporter::new(
            topics,
            runtime.diagnostics,
            firmware_version,
            runtime.timing.publish_settle_ms,
        );
        Self {
            board,
            network: LinkSupervisor::new(runtime.timing.wifi_policy()),
            broker: LinkSupervisor::new(runtime.timing.broker_policy()),
            runtime,
            firmware_version: firmware_version.to_string(),
            reporter,
            state,
            status,
        }
    }

    pub fn mode(&self) -> PowerMode {
        self.board.power_mode()
    }

    pub fn persistent_state(&self) -> PersistentState {
        self.state
    }

    pub fn topics(&self) -> &TopicSet {
        self.reporter.topics()
    }

    fn interval_ms(&self) -> u32 {
        self.board.cycle_interval_secs.saturating_mul(1_000)
    }

    pub fn run_cycle(&mut self, io: &mut NodeIo<'_>) -> CycleOutcome {
        self.state.record_boot();
        io.show_led(true);

        let mut ctx = CycleContext {
            started_ms: io.clock.now_ms(),
            timestamp: TIME_ERROR.to_string(),
            reading: SensorReading::invalid(),
            battery: None,
            failure: None,
        };

        let mut phase = CyclePhase::ConnectNetwork;
        let next = loop {
            match self.step(phase, io, &mut ctx) {
                Step::Next(following) => phase = following,
                Step::Done(next) => break next,
            }
        };

        {
            let mut status = lock(&self.status);
            status.boot_count = self.state.boot_count;
            status.success_count = self.state.success_count;
        }
        if self.mode() == PowerMode::Battery {
            io.show_led(false);
        }

        CycleOutcome {
            next,
            failure: ctx.failure,
            reading: ctx.reading,
        }
    }

    fn step(&mut self, phase: CyclePhase, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        match phase {
            CyclePhase::ConnectNetwork => self.connect_network(io, ctx),
            CyclePhase::ConnectBroker => self.connect_broker(io, ctx),
            CyclePhase::Measure => self.measure(io, ctx),
            CyclePhase::Report => self.report(io, ctx),
            CyclePhase::CheckUpdate => self.check_update(io),
            CyclePhase::Finish => {
                io.clock.delay_ms(self.runtime.timing.cycle_flush_ms);
                Step::Done(self.finish(io, ctx))
            }
        }
    }

    fn connect_network(&mut self, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        match self.network.ensure_connected(&mut *io.network, io.clock) {
            Ok(_) => {
                if self.mode() == PowerMode::Mains {
                    self.start_surface(io);
                }
                Step::Next(CyclePhase::ConnectBroker)
            }
            Err(exhausted) => {
                self.reporter.console(&format!(
                    "WiFi connection failed after {} attempts",
                    exhausted.attempts
                ));
                self.fail(
                    CycleFailure::NetworkExhausted {
                        attempts: exhausted.attempts,
                    },
                    io,
                    ctx,
                )
            }
        }
    }

    fn start_surface(&mut self, io: &mut NodeIo<'_>) {
        let Some(surface) = io.surface.as_deref_mut() else {
            return;
        };
        if surface.is_running() {
            return;
        }
        match surface.start() {
            Ok(()) => info!("status server started"),
            Err(err) => warn!("status server failed to start: {err}"),
        }
    }

    fn connect_broker(&mut self, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        match self.broker.ensure_connected(&mut *io.broker, io.clock) {
            Ok(_) => Step::Next(CyclePhase::Measure),
            Err(exhausted) => {
                self.reporter.console(&format!(
                    "MQTT connection failed after {} attempts",
                    exhausted.attempts
                ));
                self.fail(
                    CycleFailure::BrokerExhausted {
                        attempts: exhausted.attempts,
                    },
                    io,
                    ctx,
                )
            }
        }
    }

    fn measure(&mut self, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        ctx.timestamp = match io.wall_clock.now_epoch_secs() {
            Some(epoch) => format_timestamp(epoch, self.runtime.clock.total_offset_secs()),
            None => TIME_ERROR.to_string(),
        };

        let power = if self.board.switched_sensor_power_pin().is_some() {
            io.sensor_power
                .as_deref_mut()
                .map(|power| power as &mut dyn PowerSwitch)
        } else {
            None
        };
        let acquisition = read_sensor(io.sensor, power, io.clock, &self.runtime.timing);
        ctx.reading = acquisition.reading;

        if !acquisition.reading.success {
            self.reporter.diagnostic(
                io.broker,
                io.clock,
                &format!("{} Sensor Error", ctx.timestamp),
                true,
            );
            return self.fail(
                CycleFailure::SensorExhausted {
                    attempts: acquisition.attempts,
                },
                io,
                ctx,
            );
        }

        self.state.record_success();

        if self.board.measures_battery() {
            let previous = self.state.previous_voltage();
            let adc = io
                .battery
                .as_deref_mut()
                .map(|adc| adc as &mut dyn AnalogInput);
            let volts = read_battery_voltage(
                adc,
                io.clock,
                &self.runtime.timing,
                previous,
            );
            self.state.record_voltage(volts);
            ctx.battery = Some(BatterySummary {
                current: volts,
                previous: previous.unwrap_or(0.0),
            });
        }

        Step::Next(CyclePhase::Report)
    }

    fn report(&mut self, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        let summary = cycle_summary(&ctx.timestamp, &ctx.reading, ctx.battery, &self.state);
        self.reporter.diagnostic(io.broker, io.clock, &summary, true);

        let voltage = ctx.battery.map(|battery| battery.current);
        if let Err(err) = self
            .reporter
            .publish_reading(io.broker, io.clock, &ctx.reading, voltage)
        {
            warn!("reading publish failed: {err}");
        }

        lock(&self.status).record_success(&ctx.reading, voltage, &ctx.timestamp);
        Step::Next(CyclePhase::CheckUpdate)
    }

    fn check_update(&mut self, io: &mut NodeIo<'_>) -> Step {
        if !self.runtime.ota.enabled || !io.network.is_connected() {
            return Step::Next(CyclePhase::Finish);
        }
        let Some(updates) = io.updates.as_mut() else {
            return Step::Next(CyclePhase::Finish);
        };
        let Some(claim) = updates.gate.try_claim() else {
            if updates.gate.restart_pending() {
                info!("staged firmware awaits restart; skipping update check");
            } else {
                info!("firmware upload in progress; skipping update check");
            }
            return Step::Next(CyclePhase::Finish);
        };

        let outcome = check_for_update(
            &mut *updates.source,
            &mut *updates.target,
            &self.firmware_version,
            &self.runtime.ota,
        );

        match outcome {
            UpdateOutcome::UpToDate { remote } => {
                info!("firmware up to date (running {}, remote {remote})", self.firmware_version);
                Step::Next(CyclePhase::Finish)
            }
            UpdateOutcome::Installed { version, report } => {
                claim.mark_staged();
                self.reporter.diagnostic(
                    io.broker,
                    io.clock,
                    &format!(
                        "Firmware {version} installed ({} bytes, sha256 {}), restarting",
                        report.bytes, report.sha256
                    ),
                    false,
                );
                Step::Done(NextStep::Restart)
            }
            UpdateOutcome::FetchFailed(err) => {
                self.reporter
                    .diagnostic(io.broker, io.clock, &format!("Update check failed: {err}"), false);
                Step::Next(CyclePhase::Finish)
            }
            UpdateOutcome::WriteFailed(err) => {
                self.reporter
                    .diagnostic(io.broker, io.clock, &format!("Update failed: {err}"), false);
                Step::Next(CyclePhase::Finish)
            }
        }
    }

    fn fail(&mut self, failure: CycleFailure, io: &mut NodeIo<'_>, ctx: &mut CycleContext) -> Step {
        warn!("cycle failed: {failure}");
        ctx.failure = Some(failure);
        match escalate(self.mode(), failure) {
            Escalation::Suspend => Step::Done(self.suspend(io)),
            Escalation::Restart => Step::Done(NextStep::Restart),
            Escalation::IdleUntilNextCycle => Step::Done(NextStep::Idle {
                window: IdleWindow::new(ctx.started_ms, self.interval_ms()),
            }),
        }
    }

    fn finish(&mut self, io: &mut NodeIo<'_>, ctx: &CycleContext) -> NextStep {
        match self.mode() {
            PowerMode::Battery => self.suspend(io),
            PowerMode::Mains => NextStep::Idle {
                window: IdleWindow::new(ctx.started_ms, self.interval_ms()),
            },
        }
    }

    fn suspend(&mut self, io: &mut NodeIo<'_>) -> NextStep {
        io.network.disconnect();
        self.network.mark_disconnected();
        let seconds = self.board.cycle_interval_secs;
        self.reporter
            .console(&format!("Going to sleep for {seconds} seconds"));
        NextStep::Suspend { seconds }
    }

    /// Waits out the rest of the cycle while serving the status surface.
    pub fn idle(&mut self, io: &mut NodeIo<'_>, window: IdleWindow) -> IdleExit {
        let poll_ms = self.runtime.timing.idle_poll_ms.max(1);
        loop {
            if let Some(surface) = io.surface.as_deref_mut() {
                if surface.poll() == SurfacePoll::RestartRequested {
                    info!("restart requested by status server");
                    return IdleExit::Restart;
                }
            }
            if let Some(watchdog) = io.watchdog.as_deref_mut() {
                watchdog.feed();
            }

            let now = io.clock.now_ms();
            if io.led.is_some() {
                let wifi = io.network.is_connected();
                let broker = io.broker.is_connected();
                if let Some(led) = io.led.as_mut() {
                    led.follow_links(wifi, broker, now);
                }
            }

            if window.expired(now) {
                return IdleExit::CycleDue;
            }
            io.clock.delay_ms(window.remaining_ms(now).min(poll_ms));
        }
    }

    /// Runs cycles until one ends in suspend or restart.
    pub fn run(&mut self, io: &mut NodeIo<'_>) -> Terminal {
        loop {
            let outcome = self.run_cycle(io);
            match outcome.next {
                NextStep::Suspend { seconds } => return Terminal::Suspend { seconds },
                NextStep::Restart => return Terminal::Restart,
                NextStep::Idle { window } => match self.idle(io, window) {
                    IdleExit::CycleDue => continue,
                    IdleExit::Restart => return Terminal::Restart,
                },
            }
        }
    }
}
