//! Frame payloads: control verbs and the DATA snapshot carrier.
//!
//! | Payload               | Direction            |
//! |-----------------------|----------------------|
//! | `PING` / `PONG`       | either               |
//! | `RESET`               | either               |
//! | `ACK` / `ACK:<DEVICE>`| controller → bridge  |
//! | `<DEVICE>:MODE:<0-2>` | bridge → controller  |
//! | `DATA:<json>`         | controller → bridge  |

use std::fmt;

use crate::device::{Device, Mode};
use crate::error::MessageError;
use crate::frame::{encode_frame, DATA_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    Reset,
    /// `None` for a bare `ACK`.
    Ack(Option<Device>),
    SetMode { device: Device, mode: Mode },
    /// JSON document following the `DATA:` prefix, unparsed.
    Data(String),
}

impl Message {
    /// Interpret a frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        if let Some(json) = payload.strip_prefix(DATA_PREFIX) {
            let json = std::str::from_utf8(json).map_err(|_| MessageError::NotUtf8)?;
            return Ok(Self::Data(json.to_string()));
        }

        let text = std::str::from_utf8(payload).map_err(|_| MessageError::NotUtf8)?;
        match text {
            "PING" => return Ok(Self::Ping),
            "PONG" => return Ok(Self::Pong),
            "RESET" => return Ok(Self::Reset),
            "ACK" => return Ok(Self::Ack(None)),
            _ => {}
        }

        if let Some(name) = text.strip_prefix("ACK:") {
            let device = Device::from_wire(name)
                .ok_or_else(|| MessageError::UnknownDevice(name.to_string()))?;
            return Ok(Self::Ack(Some(device)));
        }

        let mut parts = text.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some("MODE"), Some(value)) => {
                let device = Device::from_wire(name)
                    .ok_or_else(|| MessageError::UnknownDevice(name.to_string()))?;
                let mode = parse_mode_digit(value)?;
                Ok(Self::SetMode { device, mode })
            }
            _ => Err(MessageError::UnknownVerb(text.to_string())),
        }
    }

    /// Payload text without markers.
    pub fn payload(&self) -> String {
        self.to_string()
    }

    /// Payload wrapped in start/end markers, ready for the wire.
    pub fn to_frame(&self) -> Vec<u8> {
        encode_frame(self.payload().as_bytes())
    }
}

/// A mode value must be a single digit 0-2; anything else is rejected so
/// the receiver keeps its previous mode.
fn parse_mode_digit(value: &str) -> Result<Mode, MessageError> {
    match value {
        "0" => Ok(Mode::Off),
        "1" => Ok(Mode::On),
        "2" => Ok(Mode::Auto),
        other => Err(MessageError::InvalidMode(other.to_string())),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => write!(f, "PING"),
            Self::Pong => write!(f, "PONG"),
            Self::Reset => write!(f, "RESET"),
            Self::Ack(None) => write!(f, "ACK"),
            Self::Ack(Some(d)) => write!(f, "ACK:{}", d.wire_name()),
            Self::SetMode { device, mode } => {
                write!(f, "{}:MODE:{}", device.wire_name(), mode.as_u8())
            }
            Self::Data(json) => write!(f, "DATA:{json}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
