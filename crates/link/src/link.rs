//! One end of the point-to-point link: transport, frame decoder and health
//! clock bundled behind a poll/send interface.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::frame::{Frame, FrameDecoder, FrameStats};
use crate::health::{LinkHealth, DEFAULT_FRESHNESS, DEFAULT_PROBE_WAIT};
use crate::message::Message;
use crate::transport::Transport;

/// Bytes pulled from the transport per read call.
const READ_CHUNK: usize = 64;

/// Sleep between reads while waiting for a pong.
const PROBE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Largest payload this end accepts.
    pub frame_capacity: usize,
    /// Largest payload the peer accepts; longer outgoing frames are refused.
    pub peer_capacity: usize,
    pub partial_timeout: Duration,
    pub salvage_truncated: bool,
    pub freshness: Duration,
    pub probe_wait: Duration,
}

impl LinkSettings {
    /// Bridge end: large receive buffer, 2 s partial timeout, controller
    /// accepts at most 100-byte commands.
    pub fn bridge() -> Self {
        Self {
            frame_capacity: 512,
            peer_capacity: 100,
            partial_timeout: Duration::from_millis(2000),
            salvage_truncated: true,
            freshness: DEFAULT_FRESHNESS,
            probe_wait: DEFAULT_PROBE_WAIT,
        }
    }

    /// Controller end: 128-byte receive buffer, 1 s partial timeout.
    pub fn controller() -> Self {
        Self {
            frame_capacity: 128,
            peer_capacity: 512,
            partial_timeout: Duration::from_millis(1000),
            salvage_truncated: true,
            freshness: DEFAULT_FRESHNESS,
            probe_wait: DEFAULT_PROBE_WAIT,
        }
    }
}

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub message: Message,
    pub salvaged: bool,
}

pub struct Link<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    health: LinkHealth,
    settings: LinkSettings,
    /// Frames that arrived while a probe was waiting for its pong.
    pending: VecDeque<Inbound>,
    rejected: u64,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        let decoder = FrameDecoder::new(settings.frame_capacity, settings.partial_timeout)
            .with_salvage(settings.salvage_truncated);
        Self {
            transport,
            decoder,
            health: LinkHealth::new(settings.freshness),
            settings,
            pending: VecDeque::new(),
            rejected: 0,
        }
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.decoder.stats()
    }

    /// Frames that completed but did not parse as a known message.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read everything waiting on the transport and return complete
    /// messages in arrival order. A timed-out partial frame is aborted
    /// first, and salvaged when possible. A read error is returned only
    /// when no message was collected before it.
    pub fn poll(&mut self, now: Instant) -> Result<Vec<Inbound>, LinkError> {
        let mut out: Vec<Inbound> = self.pending.drain(..).collect();

        if let Some(frame) = self.decoder.expire(now) {
            self.accept(frame, now, &mut out);
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match self.transport.read_available(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                // Frames already taken off the wire are still delivered.
                Err(e) if !out.is_empty() => {
                    warn!(kept = out.len(), "link: read failed: {e}");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            for &b in &buf[..n] {
                if let Some(frame) = self.decoder.feed(b, now) {
                    self.accept(frame, now, &mut out);
                }
            }
        }

        Ok(out)
    }

    /// Write one message to the peer.
    pub fn send(&mut self, message: &Message, now: Instant) -> Result<(), LinkError> {
        let payload = message.payload();
        if payload.len() > self.settings.peer_capacity {
            return Err(LinkError::FrameTooLarge {
                size: payload.len(),
                limit: self.settings.peer_capacity,
            });
        }
        self.transport.write_all(&message.to_frame())?;
        self.health.record_sent(now);
        debug!(%message, "link: sent");
        Ok(())
    }

    /// True when the peer is known to be alive. Probes with `PING` only when
    /// nothing was exchanged inside the freshness window, then waits up to
    /// the probe budget for `PONG`. Other frames arriving meanwhile are kept
    /// for the next [`Link::poll`].
    pub async fn is_responsive(&mut self) -> bool {
        let start = Instant::now();
        if self.health.is_fresh(start) {
            return true;
        }

        if let Err(e) = self.send(&Message::Ping, start) {
            warn!("link: ping failed: {e}");
            return false;
        }

        loop {
            let now = Instant::now();
            match self.poll(now) {
                Ok(inbound) => {
                    let mut answered = false;
                    for msg in inbound {
                        if msg.message == Message::Pong && !answered {
                            answered = true;
                        } else {
                            self.pending.push_back(msg);
                        }
                    }
                    if answered {
                        return true;
                    }
                }
                Err(e) => {
                    warn!("link: read failed while probing: {e}");
                    return false;
                }
            }
            if now.saturating_duration_since(start) >= self.settings.probe_wait {
                warn!(
                    wait_ms = self.settings.probe_wait.as_millis() as u64,
                    "link: no pong from peer"
                );
                return false;
            }
            tokio::time::sleep(PROBE_POLL).await;
        }
    }

    /// Reinitialize the byte stream and tell the peer. The `RESET` notice
    /// is not acknowledged.
    pub fn reset(&mut self, now: Instant) -> Result<(), LinkError> {
        info!("link: resetting");
        self.decoder.reset();
        self.pending.clear();
        self.transport.reopen()?;
        self.send(&Message::Reset, now)
    }

    fn accept(&mut self, frame: Frame, now: Instant, out: &mut Vec<Inbound>) {
        self.health.record_received(now);
        match Message::parse(&frame.payload) {
            Ok(message) => out.push(Inbound {
                message,
                salvaged: frame.salvaged,
            }),
            Err(e) => {
                self.rejected += 1;
                warn!(
                    payload = %String::from_utf8_lossy(&frame.payload),
                    "link: rejected frame: {e}"
                );
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
