//! Start/end-marker frame decoder.
//!
//! ```text
//!            '<'                      '>'
//!   Idle ─────────▶ Receiving ─────────────▶ Idle   (emit payload)
//!                    │   ▲  '<' restarts
//!                    │   └──────────┘
//!                    ├── capacity exceeded ──▶ Idle (drop)
//!                    └── timeout (expire) ───▶ Idle (drop or salvage)
//! ```
//!
//! Bytes outside a frame are ignored, including a stray `'>'`.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

pub const START_MARKER: u8 = b'<';
pub const END_MARKER: u8 = b'>';

/// Prefix of a state-snapshot payload, the only kind worth salvaging.
pub const DATA_PREFIX: &[u8] = b"DATA:";

/// A complete payload, markers stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    /// True when the end marker never arrived and a closing brace was
    /// appended to a timed-out DATA payload.
    pub salvaged: bool,
}

/// Diagnostic counters. Observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub completed: u64,
    pub overlapping: u64,
    pub overflows: u64,
    pub timeouts: u64,
    pub salvaged: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Idle,
    Receiving { since: Instant },
}

pub struct FrameDecoder {
    state: DecoderState,
    buf: Vec<u8>,
    capacity: usize,
    timeout: Duration,
    salvage: bool,
    stats: FrameStats,
}

impl FrameDecoder {
    /// `capacity` is the largest payload accepted, markers excluded.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            state: DecoderState::Idle,
            buf: Vec::with_capacity(capacity),
            capacity,
            timeout,
            salvage: true,
            stats: FrameStats::default(),
        }
    }

    /// Enable or disable the truncated-DATA salvage on timeout.
    pub fn with_salvage(mut self, salvage: bool) -> Self {
        self.salvage = salvage;
        self
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, DecoderState::Receiving { .. })
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Drop any partial frame and return to idle.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.buf.clear();
    }

    /// Consume one byte. Returns the payload once the end marker is seen.
    ///
    /// Timeouts are not checked here; call [`FrameDecoder::expire`] before
    /// each batch of bytes.
    pub fn feed(&mut self, byte: u8, now: Instant) -> Option<Frame> {
        match (self.state, byte) {
            (DecoderState::Receiving { .. }, START_MARKER) => {
                self.stats.overlapping += 1;
                warn!(
                    discarded = self.buf.len(),
                    "frame: start marker before end of previous frame"
                );
                self.begin(now);
                None
            }
            (DecoderState::Idle, START_MARKER) => {
                self.begin(now);
                None
            }
            (DecoderState::Receiving { .. }, END_MARKER) => {
                self.state = DecoderState::Idle;
                self.stats.completed += 1;
                let payload = std::mem::take(&mut self.buf);
                debug!(len = payload.len(), "frame: complete");
                Some(Frame {
                    payload,
                    salvaged: false,
                })
            }
            (DecoderState::Receiving { .. }, b) => {
                if self.buf.len() < self.capacity {
                    self.buf.push(b);
                } else {
                    self.stats.overflows += 1;
                    error!(
                        capacity = self.capacity,
                        partial = %String::from_utf8_lossy(&self.buf),
                        "frame: buffer overflow, dropping frame"
                    );
                    self.reset();
                }
                None
            }
            (DecoderState::Idle, _) => None,
        }
    }

    /// Abort a frame that has been open longer than the timeout.
    ///
    /// Returns a salvaged DATA frame when the heuristic applies: the partial
    /// payload starts with `DATA:`, holds an opening brace and no closing
    /// brace. The result is only a guess and may still fail to parse.
    pub fn expire(&mut self, now: Instant) -> Option<Frame> {
        let DecoderState::Receiving { since } = self.state else {
            return None;
        };
        let elapsed = now.saturating_duration_since(since);
        if elapsed <= self.timeout {
            return None;
        }

        self.stats.timeouts += 1;
        let mut partial = std::mem::take(&mut self.buf);
        self.state = DecoderState::Idle;
        warn!(
            len = partial.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            partial = %String::from_utf8_lossy(&partial),
            "frame: timed out waiting for end marker"
        );

        if !self.salvage || !is_salvageable(&partial) {
            return None;
        }

        partial.push(b'}');
        self.stats.salvaged += 1;
        warn!("frame: appended closing brace to truncated DATA payload");
        Some(Frame {
            payload: partial,
            salvaged: true,
        })
    }

    fn begin(&mut self, now: Instant) {
        self.buf.clear();
        self.state = DecoderState::Receiving { since: now };
    }
}

fn is_salvageable(partial: &[u8]) -> bool {
    partial.starts_with(DATA_PREFIX)
        && partial.contains(&b'{')
        && !partial.contains(&b'}')
}

/// Wrap a payload in start/end markers.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(START_MARKER);
    out.extend_from_slice(payload);
    out.push(END_MARKER);
    out
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(capacity: usize) -> FrameDecoder {
        FrameDecoder::new(capacity, Duration::from_millis(1000))
    }

    /// Feed every byte, collecting emitted frames.
    fn feed_all(d: &mut FrameDecoder, bytes: &[u8], now: Instant) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| d.feed(b, now)).collect()
    }

    // -- Complete frames ----------------------------------------------------

    #[test]
    fn emits_payload_on_end_marker() {
        let mut d = decoder(64);
        let now = Instant::now();
        let frames = feed_all(&mut d, b"<PUMP:MODE:1>", now);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"PUMP:MODE:1");
        assert!(!frames[0].salvaged);
        assert!(!d.is_receiving());
    }

    #[test]
    fn emits_nothing_before_end_marker() {
        let mut d = decoder(64);
        let now = Instant::now();
        for &b in b"<PING" {
            assert!(d.feed(b, now).is_none());
        }
        assert!(d.is_receiving());
        assert_eq!(d.feed(b'>', now).unwrap().payload, b"PING");
    }

    #[test]
    fn arbitrary_payload_bytes_pass_through() {
        let payload: Vec<u8> = (0u8..=255)
            .filter(|b| *b != START_MARKER && *b != END_MARKER)
            .collect();
        let mut d = decoder(512);
        let frames = feed_all(&mut d, &encode_frame(&payload), Instant::now());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
    }

    #[test]
    fn back_to_back_frames_in_order() {
        let mut d = decoder(64);
        let frames = feed_all(&mut d, b"<PING><ACK:FAN><PONG>", Instant::now());
        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"PING"[..], b"ACK:FAN", b"PONG"]);
        assert_eq!(d.stats().completed, 3);
    }

    #[test]
    fn empty_frame_is_emitted() {
        let mut d = decoder(8);
        let frames = feed_all(&mut d, b"<>", Instant::now());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn bytes_outside_frame_are_ignored() {
        let mut d = decoder(64);
        let frames = feed_all(&mut d, b"noise>more<PING>tail", Instant::now());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"PING");
        assert!(!d.is_receiving());
    }

    // -- Overlapping start --------------------------------------------------

    #[test]
    fn new_start_discards_partial_frame() {
        let mut d = decoder(64);
        let frames = feed_all(&mut d, b"<DATA:{\"li<PONG>", Instant::now());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"PONG");
        assert_eq!(d.stats().overlapping, 1);
    }

    // -- Capacity -----------------------------------------------------------

    #[test]
    fn payload_at_capacity_is_accepted() {
        let mut d = decoder(4);
        let frames = feed_all(&mut d, b"<PING>", Instant::now());
        assert_eq!(frames[0].payload, b"PING");
    }

    #[test]
    fn overflow_drops_frame_and_recovers() {
        let mut d = decoder(4);
        let now = Instant::now();
        // Five payload bytes overflow a four-byte buffer; the tail and the
        // stray end marker must not produce a frame.
        let frames = feed_all(&mut d, b"<PINGS>", now);
        assert!(frames.is_empty());
        assert_eq!(d.stats().overflows, 1);
        assert!(!d.is_receiving());

        let frames = feed_all(&mut d, b"<PONG>", now);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"PONG");
    }

    #[test]
    fn overflow_leaves_no_state_behind() {
        let mut d = decoder(8);
        let now = Instant::now();
        let mut stream = b"<".to_vec();
        stream.extend(std::iter::repeat(b'x').take(100));
        stream.extend_from_slice(b"><ACK>");
        let frames = feed_all(&mut d, &stream, now);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"ACK");
    }

    // -- Timeout and salvage ------------------------------------------------

    #[test]
    fn expire_before_timeout_keeps_frame_open() {
        let mut d = decoder(64);
        let start = Instant::now();
        feed_all(&mut d, b"<DATA:{\"light\":5", start);
        assert!(d.expire(start + Duration::from_millis(999)).is_none());
        assert!(d.is_receiving());
    }

    #[test]
    fn expire_salvages_truncated_data() {
        let mut d = decoder(128);
        let start = Instant::now();
        feed_all(&mut d, b"<DATA:{\"light\":50,\"moisture\":40", start);

        let frame = d.expire(start + Duration::from_millis(1001)).unwrap();
        assert!(frame.salvaged);
        assert_eq!(frame.payload, b"DATA:{\"light\":50,\"moisture\":40}");
        assert!(!d.is_receiving());
        assert_eq!(d.stats().timeouts, 1);
        assert_eq!(d.stats().salvaged, 1);
    }

    #[test]
    fn expire_drops_non_data_frame() {
        let mut d = decoder(64);
        let start = Instant::now();
        feed_all(&mut d, b"<PUMP:MO", start);
        assert!(d.expire(start + Duration::from_secs(2)).is_none());
        assert!(!d.is_receiving());
        assert_eq!(d.stats().timeouts, 1);
        assert_eq!(d.stats().salvaged, 0);
    }

    #[test]
    fn expire_drops_data_without_opening_brace() {
        let mut d = decoder(64);
        let start = Instant::now();
        feed_all(&mut d, b"<DATA:", start);
        assert!(d.expire(start + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn expire_drops_data_that_already_has_closing_brace() {
        let mut d = decoder(64);
        let start = Instant::now();
        feed_all(&mut d, b"<DATA:{\"rain\":1}", start);
        assert!(d.expire(start + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn salvage_can_be_disabled() {
        let mut d = decoder(64).with_salvage(false);
        let start = Instant::now();
        feed_all(&mut d, b"<DATA:{\"light\":5", start);
        assert!(d.expire(start + Duration::from_secs(2)).is_none());
        assert_eq!(d.stats().timeouts, 1);
    }

    #[test]
    fn timeout_is_measured_from_latest_start() {
        let mut d = decoder(64);
        let t0 = Instant::now();
        feed_all(&mut d, b"<PI", t0);
        let t1 = t0 + Duration::from_millis(900);
        feed_all(&mut d, b"<PO", t1);
        // 1100 ms after the first start but only 200 ms after the second.
        assert!(d.expire(t0 + Duration::from_millis(1100)).is_none());
        assert!(d.is_receiving());
    }

    #[test]
    fn expire_when_idle_is_a_no_op() {
        let mut d = decoder(64);
        assert!(d.expire(Instant::now() + Duration::from_secs(60)).is_none());
        assert_eq!(d.stats().timeouts, 0);
    }

    #[test]
    fn encode_frame_wraps_in_markers() {
        assert_eq!(encode_frame(b"PING"), b"<PING>");
    }
}
