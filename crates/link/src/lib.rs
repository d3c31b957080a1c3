//! Wire protocol shared by the plant-care controller and its network bridge:
//! `<...>` framing, message verbs, the DATA JSON translator, link health and
//! the byte transports underneath.

pub mod device;
pub mod error;
pub mod frame;
pub mod health;
pub mod link;
pub mod message;
pub mod schedule;
pub mod translator;
pub mod transport;

pub use device::{Device, Mode};
pub use error::{DecodeError, EncodeError, LinkError, MessageError};
pub use frame::{Frame, FrameDecoder, FrameStats};
pub use health::LinkHealth;
pub use link::{Inbound, Link, LinkSettings};
pub use message::Message;
pub use schedule::Periodic;
pub use translator::{ActuatorReport, DeviceReports, SensorSnapshot, StateUpdate};
pub use transport::{MemoryTransport, SerialTransport, Transport};
