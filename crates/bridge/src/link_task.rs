//! Serial link worker: owns the link to the controller, feeds decoded state
//! into the mirror and forwards queued mode commands.
//!
//! The web layer never touches the link directly. Commands arrive over a
//! bounded channel and are written on the next pass, in the order they were
//! queued.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use plantcare_link::translator;
use plantcare_link::{Inbound, Link, Message, Periodic, Transport};

use crate::state::SharedState;

pub struct LinkWorker<T: Transport> {
    link: Link<T>,
    shared: SharedState,
    commands: mpsc::Receiver<Message>,
    health_timer: Periodic,
}

impl<T: Transport> LinkWorker<T> {
    pub fn new(
        link: Link<T>,
        shared: SharedState,
        commands: mpsc::Receiver<Message>,
        health_every: Duration,
    ) -> Self {
        Self {
            link,
            shared,
            commands,
            health_timer: Periodic::starting_at(health_every, Instant::now()),
        }
    }

    /// Run forever, one pass every `poll_every`.
    pub async fn run(mut self, poll_every: Duration) {
        let mut ticker = tokio::time::interval(poll_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(poll_ms = poll_every.as_millis() as u64, "link worker started");
        loop {
            ticker.tick().await;
            self.step(Instant::now()).await;
        }
    }

    /// One pass: read, dispatch, send queued commands, check health.
    pub async fn step(&mut self, now: Instant) {
        match self.link.poll(now) {
            Ok(inbound) => {
                for msg in inbound {
                    self.dispatch(msg, now).await;
                }
            }
            Err(e) => {
                warn!("link read failed: {e}");
                self.shared
                    .write()
                    .await
                    .record_error(format!("link read failed: {e}"));
            }
        }
        self.sync_last_received().await;

        while let Ok(command) = self.commands.try_recv() {
            self.forward(command, now).await;
        }

        if self.health_timer.due(now) && !self.link.is_responsive().await {
            warn!(
                stats = ?self.link.frame_stats(),
                rejected = self.link.rejected_frames(),
                "controller not responding, resetting link"
            );
            let result = self.link.reset(Instant::now());
            let mut st = self.shared.write().await;
            st.record_system("controller not responding, link reset".to_string());
            if let Err(e) = result {
                st.record_error(format!("link reset failed: {e}"));
            }
        }
    }

    async fn dispatch(&mut self, inbound: Inbound, now: Instant) {
        match inbound.message {
            Message::Data(json) => match translator::decode(&json) {
                Ok(update) => {
                    debug!(
                        fields = update.field_count(),
                        salvaged = inbound.salvaged,
                        "state update"
                    );
                    self.shared.write().await.record_data(&update, inbound.salvaged);
                }
                Err(e) => {
                    warn!(%json, "bad DATA payload: {e}");
                    self.shared
                        .write()
                        .await
                        .record_error(format!("bad DATA payload: {e}"));
                }
            },
            Message::Ping => {
                if let Err(e) = self.link.send(&Message::Pong, now) {
                    warn!("pong failed: {e}");
                }
            }
            Message::Reset => {
                info!("controller reset the link");
                self.shared
                    .write()
                    .await
                    .record_system("controller reset the link".to_string());
            }
            Message::Ack(Some(device)) => self.shared.write().await.record_ack(device),
            Message::Ack(None) | Message::Pong => {}
            Message::SetMode { .. } => debug!("ignoring mode command from controller"),
        }
    }

    async fn forward(&mut self, command: Message, now: Instant) {
        let result = self.link.send(&command, now);
        let mut st = self.shared.write().await;
        match (result, &command) {
            (Ok(()), Message::SetMode { device, mode }) => st.record_command(*device, *mode),
            (Ok(()), _) => {}
            (Err(e), _) => {
                warn!(%command, "command not sent: {e}");
                st.record_error(format!("command {command} not sent: {e}"));
            }
        }
    }

    async fn sync_last_received(&mut self) {
        let last = self.link.health().last_received();
        let mut st = self.shared.write().await;
        if last > st.last_received {
            st.last_received = last;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
