use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use plantcare_link::{Device, Mode, StateUpdate};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

/// The controller counts as connected while frames keep arriving this often.
pub const CONNECTED_WINDOW: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<BridgeState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Last values reported by the controller, stored as received. Range
/// checks happen on the way out in [`BridgeState::to_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateMirror {
    pub light: i64,
    pub soil: i64,
    pub rain: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub pump_active: bool,
    pub pump_mode: i64,
    pub light_mode: i64,
    pub fan_active: bool,
    pub fan_mode: i64,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self {
            light: 0,
            soil: 0,
            rain: 0,
            temperature: f64::NAN,
            humidity: f64::NAN,
            pump_active: false,
            pump_mode: Mode::Off as i64,
            light_mode: Mode::Off as i64,
            fan_active: false,
            fan_mode: Mode::Off as i64,
        }
    }
}

impl StateMirror {
    /// Overwrite the fields present in `update`; absent fields keep their
    /// value.
    pub fn apply(&mut self, update: &StateUpdate) {
        fn set<T: Copy>(field: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *field = v;
            }
        }
        set(&mut self.light, update.light);
        set(&mut self.soil, update.soil);
        set(&mut self.rain, update.rain);
        set(&mut self.temperature, update.temperature);
        set(&mut self.humidity, update.humidity);
        set(&mut self.pump_active, update.pump_active);
        set(&mut self.pump_mode, update.pump_mode);
        set(&mut self.light_mode, update.light_mode);
        set(&mut self.fan_active, update.fan_active);
        set(&mut self.fan_mode, update.fan_mode);
    }
}

pub struct BridgeState {
    pub started_at: Instant,
    pub mirror: StateMirror,
    /// Last complete frame of any kind from the controller.
    pub last_received: Option<Instant>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Data,
    Command,
    Ack,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub light: u8,
    pub soil: u8,
    pub rain: u8,
    pub temperature: f64,
    pub humidity: f64,
    pub pump_active: bool,
    pub pump_mode: u8,
    pub light_mode: u8,
    pub fan_active: bool,
    pub fan_mode: u8,
    pub connected: bool,
    pub seconds_since_last_update: u64,
    pub uptime: u64,
    pub free_memory_kb: u64,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl BridgeState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mirror: StateMirror::default(),
            last_received: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Merge a decoded DATA document into the mirror.
    pub fn record_data(&mut self, update: &StateUpdate, salvaged: bool) {
        self.mirror.apply(update);
        let detail = if salvaged {
            format!("{} field(s) from salvaged frame", update.field_count())
        } else {
            format!("{} field(s)", update.field_count())
        };
        self.push_event(EventKind::Data, detail);
    }

    /// Record a mode command handed to the link.
    pub fn record_command(&mut self, device: Device, mode: Mode) {
        self.push_event(EventKind::Command, format!("{device} set {mode}"));
    }

    /// Record the controller's acknowledgment of a command.
    pub fn record_ack(&mut self, device: Device) {
        self.push_event(EventKind::Ack, format!("{device} acknowledged"));
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the status document. Never fails: values are clamped into
    /// their documented ranges and non-finite readings become 0.
    pub fn to_status(&self, now: Instant, free_memory_kb: u64) -> StatusResponse {
        let m = &self.mirror;
        let since = self.last_received.unwrap_or(self.started_at);
        StatusResponse {
            light: clamp_u8(m.light, 100),
            soil: clamp_u8(m.soil, 100),
            rain: u8::from(m.rain != 0),
            temperature: finite_or_zero(m.temperature),
            humidity: finite_or_zero(m.humidity),
            pump_active: m.pump_active,
            pump_mode: clamp_u8(m.pump_mode, 2),
            light_mode: clamp_u8(m.light_mode, 2),
            fan_active: m.fan_active,
            fan_mode: clamp_u8(m.fan_mode, 2),
            connected: self
                .last_received
                .is_some_and(|t| now.saturating_duration_since(t) < CONNECTED_WINDOW),
            seconds_since_last_update: now.saturating_duration_since(since).as_secs(),
            uptime: now.saturating_duration_since(self.started_at).as_secs(),
            free_memory_kb,
        }
    }

    /// Events, newest first.
    pub fn recent_events(&self) -> Vec<SystemEvent> {
        self.events.iter().rev().cloned().collect()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_u8(value: i64, max: u8) -> u8 {
    value.clamp(0, i64::from(max)) as u8
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Memory available to new allocations on this host, in KiB.
pub fn free_memory_kb() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.available_memory() / 1024
}

// ===========================================================================
// Tests
// ===========================================================================
