//! TOML config file loading and validation for the link, the sensor loop and
//! the three actuators.
//!
//! Every section and every field is optional. Actuator fields fall back to
//! per-device defaults, so a `[pump]` section may override a single value.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use plantcare_link::{Device, LinkSettings, Mode};

use crate::actuator::{ActuatorSettings, TurnOn};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkSection,
    pub sensors: SensorSection,
    pub pump: ActuatorEntry,
    pub light: ActuatorEntry,
    pub fan: ActuatorEntry,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub port: String,
    pub baud: u32,
    pub frame_capacity: usize,
    pub partial_timeout_ms: u64,
    pub send_interval_ms: u64,
    pub health_interval_ms: u64,
    pub salvage_truncated: bool,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".into(),
            baud: 115_200,
            frame_capacity: 128,
            partial_timeout_ms: 1000,
            send_interval_ms: 10_000,
            health_interval_ms: 60_000,
            salvage_truncated: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub read_interval_ms: u64,
    /// Simulator profile: `drying`, `stable`, `flaky` or `wet`.
    pub scenario: String,
    /// Length of one simulated day.
    pub diurnal_period_s: f64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            read_interval_ms: 2000,
            scenario: "drying".into(),
            diurnal_period_s: 600.0,
        }
    }
}

/// Per-actuator overrides. `safety_timeout_ms = 0` disables the safety
/// timeout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActuatorEntry {
    pub on_threshold: Option<f64>,
    pub off_threshold: Option<f64>,
    pub debounce_ms: Option<u64>,
    pub min_run_ms: Option<u64>,
    pub safety_timeout_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub control_interval_ms: Option<u64>,
    pub relay_pin: Option<u8>,
    pub active_low: Option<bool>,
    pub initial_mode: Option<Mode>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Built-in tuning per actuator.
///
/// Pump: on below 15 % soil moisture, off above 90 %. Light: on below 25 %
/// brightness, off above 75 %. Fan: on above 30 °C, off below 25 °C.
pub fn default_settings(device: Device) -> ActuatorSettings {
    match device {
        Device::Pump => ActuatorSettings {
            turn_on: TurnOn::Below,
            on_threshold: 15.0,
            off_threshold: 90.0,
            debounce: Duration::from_millis(10_000),
            min_run: Duration::from_millis(10_000),
            safety_timeout: Some(Duration::from_millis(20_000)),
            cooldown: Duration::from_millis(180_000),
            control_interval: Duration::from_millis(5000),
            relay_pin: 17,
            active_low: true,
            initial_mode: Mode::Auto,
        },
        Device::Light => ActuatorSettings {
            turn_on: TurnOn::Below,
            on_threshold: 25.0,
            off_threshold: 75.0,
            debounce: Duration::from_millis(1000),
            min_run: Duration::ZERO,
            safety_timeout: None,
            cooldown: Duration::ZERO,
            control_interval: Duration::from_millis(5000),
            relay_pin: 27,
            active_low: false,
            initial_mode: Mode::Auto,
        },
        Device::Fan => ActuatorSettings {
            turn_on: TurnOn::Above,
            on_threshold: 30.0,
            off_threshold: 25.0,
            debounce: Duration::from_millis(5000),
            min_run: Duration::ZERO,
            safety_timeout: None,
            cooldown: Duration::ZERO,
            control_interval: Duration::from_millis(10_000),
            relay_pin: 22,
            active_low: false,
            initial_mode: Mode::Auto,
        },
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// BCM GPIO pins usable for relays on the 40-pin header. GPIO 0-1 are
/// reserved for the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Temperatures the DHT22 can report.
const FAN_THRESHOLD_RANGE: std::ops::RangeInclusive<f64> = -40.0..=80.0;

impl Config {
    fn entry(&self, device: Device) -> &ActuatorEntry {
        match device {
            Device::Pump => &self.pump,
            Device::Light => &self.light,
            Device::Fan => &self.fan,
        }
    }

    /// Effective settings for one actuator: file values over defaults.
    pub fn actuator(&self, device: Device) -> ActuatorSettings {
        let d = default_settings(device);
        let e = self.entry(device);
        let ms = Duration::from_millis;
        ActuatorSettings {
            turn_on: d.turn_on,
            on_threshold: e.on_threshold.unwrap_or(d.on_threshold),
            off_threshold: e.off_threshold.unwrap_or(d.off_threshold),
            debounce: e.debounce_ms.map(ms).unwrap_or(d.debounce),
            min_run: e.min_run_ms.map(ms).unwrap_or(d.min_run),
            safety_timeout: match e.safety_timeout_ms {
                Some(0) => None,
                Some(v) => Some(ms(v)),
                None => d.safety_timeout,
            },
            cooldown: e.cooldown_ms.map(ms).unwrap_or(d.cooldown),
            control_interval: e.control_interval_ms.map(ms).unwrap_or(d.control_interval),
            relay_pin: e.relay_pin.unwrap_or(d.relay_pin),
            active_low: e.active_low.unwrap_or(d.active_low),
            initial_mode: e.initial_mode.unwrap_or(d.initial_mode),
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            frame_capacity: self.link.frame_capacity,
            partial_timeout: Duration::from_millis(self.link.partial_timeout_ms),
            salvage_truncated: self.link.salvage_truncated,
            ..LinkSettings::controller()
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_link(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_actuators(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_link(&self, errors: &mut Vec<String>) {
        let l = &self.link;
        if l.port.trim().is_empty() {
            errors.push("link: port is empty".into());
        }
        if l.baud == 0 {
            errors.push("link: baud must be positive".into());
        }
        if l.frame_capacity < 16 {
            errors.push(format!(
                "link: frame_capacity {} is too small (minimum 16)",
                l.frame_capacity
            ));
        }
        for (name, value) in [
            ("partial_timeout_ms", l.partial_timeout_ms),
            ("send_interval_ms", l.send_interval_ms),
            ("health_interval_ms", l.health_interval_ms),
        ] {
            if value == 0 {
                errors.push(format!("link: {name} must be positive"));
            }
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let s = &self.sensors;
        if s.read_interval_ms == 0 {
            errors.push("sensors: read_interval_ms must be positive".into());
        }
        if !s.diurnal_period_s.is_finite() || s.diurnal_period_s <= 0.0 {
            errors.push(format!(
                "sensors: diurnal_period_s must be positive, got {}",
                s.diurnal_period_s
            ));
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let mut seen_pins: HashSet<u8> = HashSet::new();

        for device in Device::ALL {
            let a = self.actuator(device);

            // ── Thresholds ──────────────────────────────────────
            let range = match device {
                Device::Fan => FAN_THRESHOLD_RANGE,
                _ => 0.0..=100.0,
            };
            let thresholds = [
                ("on_threshold", a.on_threshold),
                ("off_threshold", a.off_threshold),
            ];
            for (name, value) in thresholds {
                if !range.contains(&value) {
                    errors.push(format!(
                        "{device}: {name} {value} out of range [{}, {}]",
                        range.start(),
                        range.end()
                    ));
                }
            }
            match a.turn_on {
                TurnOn::Below if a.on_threshold >= a.off_threshold => errors.push(format!(
                    "{device}: on_threshold ({}) must be below off_threshold ({})",
                    a.on_threshold, a.off_threshold
                )),
                TurnOn::Above if a.on_threshold <= a.off_threshold => errors.push(format!(
                    "{device}: on_threshold ({}) must be above off_threshold ({})",
                    a.on_threshold, a.off_threshold
                )),
                _ => {}
            }

            // ── Timing ──────────────────────────────────────────
            if a.control_interval.is_zero() {
                errors.push(format!("{device}: control_interval_ms must be positive"));
            }
            if let Some(limit) = a.safety_timeout {
                if a.min_run > limit {
                    errors.push(format!(
                        "{device}: min_run_ms ({}) exceeds safety_timeout_ms ({})",
                        a.min_run.as_millis(),
                        limit.as_millis()
                    ));
                }
            }

            // ── Relay pin ───────────────────────────────────────
            if !VALID_GPIO_PINS.contains(&a.relay_pin) {
                errors.push(format!(
                    "{device}: relay_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    a.relay_pin
                ));
            } else if !seen_pins.insert(a.relay_pin) {
                errors.push(format!(
                    "{device}: relay_pin {} is already used by another actuator",
                    a.relay_pin
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// built-in defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(path, "config file not found, using built-in defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
