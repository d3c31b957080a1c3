//! Stateful environment simulator standing in for the sensor drivers.
//!
//! Models a potted plant on a windowsill:
//! - Soil moisture random walk with evaporation drift and mean reversion
//! - Closed-loop watering response (moisture rises while the pump runs)
//! - Diurnal light and temperature cycle
//! - Fan cooling while the fan runs
//! - Occasional rain spells that wet the soil
//! - Per-reading sensor noise and rare spikes

use std::fmt;
use std::time::Instant;

use plantcare_link::translator::{DeviceReports, SensorSnapshot};

use crate::controller::SensorSource;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `sensors.scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range, steady drift toward dry. Exercises AUTO watering.
    Drying,
    /// Hovers mid-range with low noise. Nothing should switch.
    Stable,
    /// High noise and frequent spikes. Exercises the hysteresis band.
    Flaky,
    /// Starts near saturation, dries slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct EnvironmentSim {
    started: Instant,
    diurnal_period_s: f64,

    /// "True" soil moisture in percent. Evolves each sample.
    moisture: f64,
    /// Degrees the fan has pulled the room below ambient.
    fan_cooling: f64,
    raining: bool,

    // Moisture walk
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    wet_rate: f64,

    // Sensor noise
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
}

impl EnvironmentSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start) =
            match scenario {
                Scenario::Drying => (-0.4, 0.5, 0.01, 0.8, 0.03_f32, 15.0, 45.0),
                Scenario::Stable => (-0.05, 0.2, 0.05, 0.3, 0.005, 8.0, 50.0),
                Scenario::Flaky => (-0.2, 1.0, 0.02, 3.0, 0.10, 25.0, 50.0),
                Scenario::Wet => (-0.1, 0.3, 0.02, 0.5, 0.02, 10.0, 85.0),
            };

        Self {
            started: Instant::now(),
            diurnal_period_s,
            moisture: start,
            fan_cooling: 0.0,
            raining: false,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: 50.0,
            wet_rate: 6.0,
            noise_sigma,
            spike_prob,
            spike_sigma,
        }
    }

    /// Position in the simulated day, 0.0 ..= 1.0 (0.5 is solar noon).
    fn day_phase(&self, now: Instant) -> f64 {
        let t = now.saturating_duration_since(self.started).as_secs_f64();
        (t / self.diurnal_period_s).fract()
    }

    /// Produce the next snapshot, given what the actuators are doing.
    ///
    /// Call once per sensor read; the internal state evolves with each call.
    pub fn sample(&mut self, devices: &DeviceReports, now: Instant) -> SensorSnapshot {
        // -- Weather --------------------------------------------------------
        let flip = if self.raining { 0.05 } else { 0.01 };
        if fastrand::f64() < flip {
            self.raining = !self.raining;
        }

        // -- Soil -----------------------------------------------------------
        let pull = self.mean_reversion * (self.center - self.moisture);
        let walk = gaussian(0.0, self.walk_sigma);
        let water = if devices.pump.active { self.wet_rate } else { 0.0 };
        let rain = if self.raining { 1.5 } else { 0.0 };
        self.moisture =
            (self.moisture + self.drift_per_sample + pull + walk + water + rain).clamp(0.0, 100.0);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        let soil = self.moisture + gaussian(0.0, self.noise_sigma) + spike;

        // -- Light ----------------------------------------------------------
        let phase = self.day_phase(now);
        let sun = (std::f64::consts::PI * (2.0 * phase - 0.5)).sin().max(0.0);
        let cloud = if self.raining { 0.4 } else { 1.0 };
        let light = 100.0 * sun * cloud + gaussian(0.0, 2.0);

        // -- Climate --------------------------------------------------------
        if devices.fan.active {
            self.fan_cooling = (self.fan_cooling + 0.5).min(8.0);
        } else {
            self.fan_cooling = (self.fan_cooling - 0.2).max(0.0);
        }
        let ambient = 22.0 + 10.0 * sun - if self.raining { 3.0 } else { 0.0 };
        let temperature = ambient - self.fan_cooling + gaussian(0.0, 0.2);
        let humidity = (45.0 + if self.raining { 35.0 } else { 0.0 } - 8.0 * sun
            + gaussian(0.0, 1.0))
        .clamp(0.0, 100.0);

        SensorSnapshot {
            light: light.round().clamp(0.0, 100.0) as u8,
            soil_moisture: soil.round().clamp(0.0, 100.0) as u8,
            rain: self.raining,
            temperature_c: temperature,
            humidity_percent: humidity,
        }
    }
}

impl SensorSource for EnvironmentSim {
    fn read(&mut self, devices: &DeviceReports, now: Instant) -> SensorSnapshot {
        self.sample(devices, now)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
