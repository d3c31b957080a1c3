//! Per-actuator control: OFF/ON/AUTO modes with debounce, hysteresis,
//! minimum run time, AUTO cooldown and a safety timeout.
//!
//! ## Decision order on every control tick
//!
//! ```text
//! active longer than safety_timeout ──▶ forced OFF (debounce bypassed)
//! mode OFF / ON ─────────────────────▶ drive relay to match the mode
//! mode AUTO ─────────────────────────▶ hysteresis band
//!      wants OFF but min_run not met ─▶ stay ON
//!      wants ON but cooling down ─────▶ stay OFF
//! every relay change ────────────────▶ refused inside the debounce window
//! ```

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use plantcare_link::translator::{ActuatorReport, DeviceReports, SensorSnapshot};
use plantcare_link::{Device, Mode};

use crate::relay::{RelayBoard, RelayWiring};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Which side of the band switches the actuator on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOn {
    /// Pump, grow-light: on when the reading drops below `on_threshold`.
    Below,
    /// Fan: on when the reading rises above `on_threshold`.
    Above,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorSettings {
    pub turn_on: TurnOn,
    pub on_threshold: f64,
    pub off_threshold: f64,
    pub debounce: Duration,
    pub min_run: Duration,
    pub safety_timeout: Option<Duration>,
    /// After an AUTO run ends, AUTO may not start again for this long.
    pub cooldown: Duration,
    pub control_interval: Duration,
    pub relay_pin: u8,
    pub active_low: bool,
    pub initial_mode: Mode,
}

impl ActuatorSettings {
    /// What the hysteresis band asks for. Inside the dead zone (or on a NaN
    /// reading) the current state is kept.
    fn band_wants(&self, reading: f64, active: bool) -> bool {
        match self.turn_on {
            TurnOn::Below if reading < self.on_threshold => true,
            TurnOn::Below if reading > self.off_threshold => false,
            TurnOn::Above if reading > self.on_threshold => true,
            TurnOn::Above if reading < self.off_threshold => false,
            _ => active,
        }
    }
}

// ---------------------------------------------------------------------------
// Single actuator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Unchanged,
    Switched { on: bool },
    /// Forced off after running longer than the safety timeout.
    SafetyTrip { ran_for: Duration },
}

#[derive(Debug)]
pub struct Actuator {
    device: Device,
    settings: ActuatorSettings,
    mode: Mode,
    active: bool,
    last_change: Option<Instant>,
    on_since: Option<Instant>,
    last_auto_stop: Option<Instant>,
}

impl Actuator {
    pub fn new(device: Device, settings: ActuatorSettings) -> Self {
        Self {
            device,
            mode: settings.initial_mode,
            settings,
            active: false,
            last_change: None,
            on_since: None,
            last_auto_stop: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    pub fn settings(&self) -> &ActuatorSettings {
        &self.settings
    }

    pub fn report(&self) -> ActuatorReport {
        ActuatorReport {
            mode: self.mode,
            active: self.active,
        }
    }

    /// Apply a commanded mode. OFF and ON drive the relay right away, subject
    /// to debounce; AUTO only changes the policy for later ticks. Returns the
    /// new relay state when it changed.
    pub fn set_mode(&mut self, mode: Mode, now: Instant) -> Option<bool> {
        if mode != self.mode {
            info!(device = %self.device, from = %self.mode, to = %mode, "mode changed");
        }
        self.mode = mode;
        match mode {
            Mode::Off => self.switch(false, now).then_some(false),
            Mode::On => self.switch(true, now).then_some(true),
            Mode::Auto => None,
        }
    }

    /// One control step against the current sensor reading.
    pub fn tick(&mut self, reading: f64, now: Instant) -> TickOutcome {
        if let Some(ran_for) = self.safety_exceeded(now) {
            self.force_off(now);
            warn!(
                device = %self.device,
                ran_for_ms = ran_for.as_millis() as u64,
                "safety timeout: forced off"
            );
            return TickOutcome::SafetyTrip { ran_for };
        }

        let want = match self.mode {
            Mode::Off => false,
            Mode::On => true,
            Mode::Auto => self.auto_wants(reading, now),
        };

        if want != self.active && self.switch(want, now) {
            TickOutcome::Switched { on: want }
        } else {
            TickOutcome::Unchanged
        }
    }

    fn auto_wants(&self, reading: f64, now: Instant) -> bool {
        let want = self.settings.band_wants(reading, self.active);

        if self.active && !want {
            if let Some(since) = self.on_since {
                if now.saturating_duration_since(since) < self.settings.min_run {
                    debug!(device = %self.device, "holding on for minimum run time");
                    return true;
                }
            }
        }

        if !self.active && want {
            if let Some(stopped) = self.last_auto_stop {
                if now.saturating_duration_since(stopped) < self.settings.cooldown {
                    debug!(device = %self.device, "cooling down, not starting");
                    return false;
                }
            }
        }

        want
    }

    fn safety_exceeded(&self, now: Instant) -> Option<Duration> {
        let limit = self.settings.safety_timeout?;
        let since = self.on_since.filter(|_| self.active)?;
        let ran_for = now.saturating_duration_since(since);
        (ran_for > limit).then_some(ran_for)
    }

    /// Safety cutoff: bypasses debounce. ON falls back to OFF so the relay is
    /// not re-energized on the next tick; AUTO stays AUTO and cools down.
    fn force_off(&mut self, now: Instant) {
        if self.mode == Mode::On {
            self.mode = Mode::Off;
        }
        self.apply(false, now);
    }

    /// Change the relay state unless the debounce window is still open.
    /// Returns whether the state changed.
    fn switch(&mut self, on: bool, now: Instant) -> bool {
        if on == self.active {
            return false;
        }
        if let Some(t) = self.last_change {
            if now.saturating_duration_since(t) < self.settings.debounce {
                debug!(device = %self.device, on, "change suppressed by debounce");
                return false;
            }
        }
        self.apply(on, now);
        true
    }

    fn apply(&mut self, on: bool, now: Instant) {
        if !on && self.active && self.mode == Mode::Auto {
            self.last_auto_stop = Some(now);
        }
        self.active = on;
        self.last_change = Some(now);
        self.on_since = on.then_some(now);
    }
}

// ---------------------------------------------------------------------------
// Bank: the three actuators and their relays
// ---------------------------------------------------------------------------

pub struct ActuatorBank {
    pump: Actuator,
    light: Actuator,
    fan: Actuator,
    board: RelayBoard,
}

impl ActuatorBank {
    pub fn new(settings: impl Fn(Device) -> ActuatorSettings) -> Result<Self> {
        let pump = Actuator::new(Device::Pump, settings(Device::Pump));
        let light = Actuator::new(Device::Light, settings(Device::Light));
        let fan = Actuator::new(Device::Fan, settings(Device::Fan));

        let wiring: Vec<RelayWiring> = [&pump, &light, &fan]
            .iter()
            .map(|a| RelayWiring {
                device: a.device,
                pin: a.settings.relay_pin,
                active_low: a.settings.active_low,
            })
            .collect();
        let board = RelayBoard::new(&wiring)?;

        Ok(Self {
            pump,
            light,
            fan,
            board,
        })
    }

    pub fn get(&self, device: Device) -> &Actuator {
        match device {
            Device::Pump => &self.pump,
            Device::Light => &self.light,
            Device::Fan => &self.fan,
        }
    }

    fn get_mut(&mut self, device: Device) -> &mut Actuator {
        match device {
            Device::Pump => &mut self.pump,
            Device::Light => &mut self.light,
            Device::Fan => &mut self.fan,
        }
    }

    pub fn set_mode(&mut self, device: Device, mode: Mode, now: Instant) {
        if let Some(on) = self.get_mut(device).set_mode(mode, now) {
            self.board.set(device, on);
        }
    }

    /// Run one control tick for `device` against the reading it regulates.
    pub fn tick(&mut self, device: Device, sensors: &SensorSnapshot, now: Instant) -> TickOutcome {
        let outcome = self.get_mut(device).tick(regulated_reading(device, sensors), now);
        match outcome {
            TickOutcome::Switched { on } => self.board.set(device, on),
            TickOutcome::SafetyTrip { .. } => self.board.set(device, false),
            TickOutcome::Unchanged => {}
        }
        outcome
    }

    pub fn reports(&self) -> DeviceReports {
        DeviceReports {
            pump: self.pump.report(),
            light: self.light.report(),
            fan: self.fan.report(),
        }
    }

    /// De-energize every relay, e.g. on shutdown.
    pub fn all_off(&mut self) {
        self.board.all_off();
    }

    #[cfg(all(test, not(feature = "gpio")))]
    pub(crate) fn relay_on(&self, device: Device) -> bool {
        self.board.states.get(&device).copied().unwrap_or(false)
    }
}

/// Pump follows soil moisture, grow-light follows ambient light, fan follows
/// temperature.
pub fn regulated_reading(device: Device, sensors: &SensorSnapshot) -> f64 {
    match device {
        Device::Pump => f64::from(sensors.soil_moisture),
        Device::Light => f64::from(sensors.light),
        Device::Fan => sensors.temperature_c,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
