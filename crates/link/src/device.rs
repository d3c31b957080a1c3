//! Actuator identities and operating modes shared by both ends of the link.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::MessageError;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// One of the three actuators on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Pump,
    Light,
    Fan,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Pump, Device::Light, Device::Fan];

    /// Upper-case name used on the wire (`PUMP:MODE:1`, `ACK:PUMP`).
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Pump => "PUMP",
            Self::Light => "LIGHT",
            Self::Fan => "FAN",
        }
    }

    /// Parse the upper-case wire name. Exact match only.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "PUMP" => Some(Self::Pump),
            "LIGHT" => Some(Self::Light),
            "FAN" => Some(Self::Fan),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => write!(f, "pump"),
            Self::Light => write!(f, "light"),
            Self::Fan => write!(f, "fan"),
        }
    }
}

/// Parses the lower-case API name (`pump`, `light`, `fan`).
impl FromStr for Device {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pump" => Ok(Self::Pump),
            "light" => Ok(Self::Light),
            "fan" => Ok(Self::Fan),
            other => Err(MessageError::UnknownDevice(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Actuator policy. The numeric value is what travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off = 0,
    On = 1,
    Auto = 2,
}

impl Mode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse the API action name (`off`, `on`, `auto`).
    pub fn from_action(s: &str) -> Option<Self> {
        match s {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl TryFrom<i64> for Mode {
    type Error = MessageError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            2 => Ok(Self::Auto),
            other => Err(MessageError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "OFF"),
            Self::On => write!(f, "ON"),
            Self::Auto => write!(f, "AUTO"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
