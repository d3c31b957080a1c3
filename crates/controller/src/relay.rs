//! Actuator relays via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock board records state and logs transitions.

use anyhow::Result;
use std::collections::HashMap;

use plantcare_link::Device;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// Wiring of one relay channel.
#[derive(Debug, Clone, Copy)]
pub struct RelayWiring {
    pub device: Device,
    pub pin: u8,
    /// Ground-triggered relay: LOW = ON.
    pub active_low: bool,
}

// ---------------------------------------------------------------------------
// Real GPIO relay board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct RelayBoard {
    pins: HashMap<Device, (OutputPin, bool)>, // device -> (pin, active_low)
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub fn new(wiring: &[RelayWiring]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for w in wiring {
            let mut pin = gpio.get(w.pin)?.into_output();
            drive(&mut pin, w.active_low, false);
            tracing::info!(
                device = %w.device,
                pin = w.pin,
                active_low = w.active_low,
                "relay registered"
            );
            pins.insert(w.device, (pin, w.active_low));
        }

        Ok(Self { pins })
    }

    pub fn set(&mut self, device: Device, on: bool) {
        if let Some((pin, active_low)) = self.pins.get_mut(&device) {
            drive(pin, *active_low, on);
            tracing::info!(%device, on, "relay set");
        } else {
            tracing::warn!(%device, "no relay wired for device");
        }
    }

    pub fn all_off(&mut self) {
        for (pin, active_low) in self.pins.values_mut() {
            drive(pin, *active_low, false);
        }
        tracing::info!("all relays off");
    }
}

#[cfg(feature = "gpio")]
fn drive(pin: &mut OutputPin, active_low: bool, on: bool) {
    // Pin level is HIGH exactly when `on` differs from `active_low`.
    if on != active_low {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct RelayBoard {
    pub(crate) states: HashMap<Device, bool>,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub fn new(wiring: &[RelayWiring]) -> Result<Self> {
        let mut states = HashMap::new();
        for w in wiring {
            tracing::info!(
                device = %w.device,
                pin = w.pin,
                "[mock-gpio] relay registered (not wired)"
            );
            states.insert(w.device, false);
        }
        Ok(Self { states })
    }

    pub fn set(&mut self, device: Device, on: bool) {
        if let Some(state) = self.states.get_mut(&device) {
            *state = on;
            tracing::info!(%device, on, "[mock-gpio] relay set");
        } else {
            tracing::warn!(%device, "[mock-gpio] no relay wired for device");
        }
    }

    pub fn all_off(&mut self) {
        for state in self.states.values_mut() {
            *state = false;
        }
        tracing::info!("[mock-gpio] all relays off");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn wiring() -> Vec<RelayWiring> {
        vec![
            RelayWiring {
                device: Device::Pump,
                pin: 17,
                active_low: true,
            },
            RelayWiring {
                device: Device::Fan,
                pin: 22,
                active_low: false,
            },
        ]
    }

    // -- RelayBoard (mock) --------------------------------------------------

    #[test]
    fn new_board_starts_all_off() {
        let board = RelayBoard::new(&wiring()).unwrap();
        assert_eq!(board.states.len(), 2);
        assert!(board.states.values().all(|on| !on));
    }

    #[test]
    fn set_switches_one_relay() {
        let mut board = RelayBoard::new(&wiring()).unwrap();
        board.set(Device::Pump, true);
        assert!(board.states[&Device::Pump]);
        assert!(!board.states[&Device::Fan]);
    }

    #[test]
    fn all_off_resets_everything() {
        let mut board = RelayBoard::new(&wiring()).unwrap();
        board.set(Device::Pump, true);
        board.set(Device::Fan, true);
        board.all_off();
        assert!(board.states.values().all(|on| !on));
    }

    #[test]
    fn unwired_device_is_ignored() {
        let mut board = RelayBoard::new(&wiring()).unwrap();
        board.set(Device::Light, true);
        assert_eq!(board.states.len(), 2);
    }
}
