//! The controller's single cooperative loop. Each tick polls the link,
//! dispatches inbound messages, then runs whichever periodic jobs are due:
//! sensor read, per-actuator control, state push and link health check.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use plantcare_link::translator::{self, DeviceReports, SensorSnapshot};
use plantcare_link::{Device, Inbound, Link, Message, Periodic, Transport};

use crate::actuator::{ActuatorBank, TickOutcome};

/// Source of calibrated sensor values.
pub trait SensorSource {
    /// Take one reading. `devices` lets a simulated environment react to the
    /// actuators.
    fn read(&mut self, devices: &DeviceReports, now: Instant) -> SensorSnapshot;
}

#[derive(Debug, Clone)]
pub struct Intervals {
    pub sensor_read: Duration,
    pub send: Duration,
    pub health: Duration,
}

pub struct Controller<T: Transport, S: SensorSource> {
    link: Link<T>,
    bank: ActuatorBank,
    sensors: S,
    latest: Option<SensorSnapshot>,
    read_timer: Periodic,
    send_timer: Periodic,
    health_timer: Periodic,
    control_timers: [(Device, Periodic); 3],
}

impl<T: Transport, S: SensorSource> Controller<T, S> {
    pub fn new(link: Link<T>, bank: ActuatorBank, sensors: S, intervals: Intervals) -> Self {
        let now = Instant::now();
        let control_timers = Device::ALL.map(|d| {
            let every = bank.get(d).settings().control_interval;
            (d, Periodic::new(every))
        });
        Self {
            link,
            bank,
            sensors,
            latest: None,
            read_timer: Periodic::new(intervals.sensor_read),
            send_timer: Periodic::starting_at(intervals.send, now),
            health_timer: Periodic::starting_at(intervals.health, now),
            control_timers,
        }
    }

    pub fn bank(&self) -> &ActuatorBank {
        &self.bank
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    /// Run one pass of the loop.
    pub async fn tick(&mut self, now: Instant) {
        match self.link.poll(now) {
            Ok(inbound) => {
                for msg in inbound {
                    self.dispatch(msg, now);
                }
            }
            Err(e) => warn!("link read failed: {e}"),
        }

        if self.read_timer.due(now) {
            let snapshot = self.sensors.read(&self.bank.reports(), now);
            debug!(?snapshot, "sensors read");
            self.latest = Some(snapshot);
        }

        if let Some(sensors) = self.latest {
            for (device, timer) in self.control_timers.iter_mut() {
                if !timer.due(now) {
                    continue;
                }
                match self.bank.tick(*device, &sensors, now) {
                    TickOutcome::Switched { on } => {
                        info!(%device, on, "auto control switched");
                        self.send_timer.trigger();
                    }
                    TickOutcome::SafetyTrip { ran_for } => {
                        error!(
                            %device,
                            ran_for_ms = ran_for.as_millis() as u64,
                            "safety event: actuator forced off"
                        );
                        self.send_timer.trigger();
                    }
                    TickOutcome::Unchanged => {}
                }
            }
        }

        if self.send_timer.due(now) {
            self.send_state(now);
        }

        if self.health_timer.due(now) && !self.link.is_responsive().await {
            warn!("bridge not responding, resetting link");
            if let Err(e) = self.link.reset(Instant::now()) {
                error!("link reset failed: {e}");
            }
        }
    }

    fn dispatch(&mut self, inbound: Inbound, now: Instant) {
        match inbound.message {
            Message::Ping => self.reply(&Message::Pong, now),
            Message::SetMode { device, mode } => {
                self.bank.set_mode(device, mode, now);
                let a = self.bank.get(device);
                info!(
                    %device,
                    mode = %a.mode(),
                    active = a.active(),
                    last_change = ?a.last_change(),
                    "mode command applied"
                );
                self.reply(&Message::Ack(Some(device)), now);
                self.send_timer.trigger();
            }
            Message::Reset => info!("bridge reset the link"),
            Message::Pong | Message::Ack(_) => {}
            Message::Data(_) => debug!("ignoring DATA from bridge"),
        }
    }

    fn reply(&mut self, message: &Message, now: Instant) {
        if let Err(e) = self.link.send(message, now) {
            warn!(%message, "reply failed: {e}");
        }
    }

    /// Send the current snapshot. Nothing is sent before the first sensor
    /// read, or when the document would not fit the bridge's frame.
    fn send_state(&mut self, now: Instant) {
        let Some(sensors) = self.latest else {
            return;
        };
        match translator::encode(&sensors, &self.bank.reports()) {
            Ok(json) => {
                if let Err(e) = self.link.send(&Message::Data(json), now) {
                    warn!("state push failed: {e}");
                }
            }
            Err(e) => error!("state not sent: {e}"),
        }
    }

    /// De-energize all relays.
    pub fn shutdown(&mut self) {
        self.bank.all_off();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;
    use crate::actuator::ActuatorSettings;
    use crate::config::default_settings;
    use plantcare_link::{LinkSettings, MemoryTransport, Mode};

    struct FixedSensors(SensorSnapshot);

    impl SensorSource for FixedSensors {
        fn read(&mut self, _devices: &DeviceReports, _now: Instant) -> SensorSnapshot {
            self.0
        }
    }

    fn snapshot(soil: u8) -> SensorSnapshot {
        SensorSnapshot {
            light: 75,
            soil_moisture: soil,
            rain: false,
            temperature_c: 24.3,
            humidity_percent: 60.0,
        }
    }

    fn controller(soil: u8, initial: Mode) -> Controller<MemoryTransport, FixedSensors> {
        let (ours, _peer) = MemoryTransport::pair();
        let link = Link::new(ours, LinkSettings::controller());
        let bank = ActuatorBank::new(|d| ActuatorSettings {
            initial_mode: initial,
            ..default_settings(d)
        })
        .unwrap();
        Controller::new(
            link,
            bank,
            FixedSensors(snapshot(soil)),
            Intervals {
                sensor_read: Duration::from_secs(2),
                send: Duration::from_secs(10),
                health: Duration::from_secs(60),
            },
        )
    }

    fn written(c: &Controller<MemoryTransport, FixedSensors>) -> String {
        String::from_utf8(c.link().transport().take_written()).unwrap()
    }

    // -- Commands -----------------------------------------------------------

    #[tokio::test]
    async fn mode_command_switches_pump_and_acks() {
        let mut c = controller(50, Mode::Off);
        let now = Instant::now();
        c.link().transport().inject(b"<PUMP:MODE:1>");
        c.tick(now).await;

        assert!(c.bank().get(Device::Pump).active());
        assert_eq!(c.bank().get(Device::Pump).mode(), Mode::On);

        let out = written(&c);
        assert!(out.starts_with("<ACK:PUMP>"), "got {out}");
        // State is pushed right away, confirming the change.
        assert!(out.contains("\"pump\":1"), "got {out}");
        assert!(out.contains("\"pMode\":1"), "got {out}");
    }

    #[tokio::test]
    async fn invalid_mode_keeps_previous_mode() {
        let mut c = controller(50, Mode::Off);
        c.link().transport().inject(b"<PUMP:MODE:5>");
        c.tick(Instant::now()).await;
        assert_eq!(c.bank().get(Device::Pump).mode(), Mode::Off);
        assert!(!written(&c).contains("ACK"));
    }

    #[tokio::test]
    async fn peer_reset_keeps_the_frame_after_it() {
        let mut c = controller(50, Mode::Off);
        let now = Instant::now();
        c.link().transport().inject(b"<RESET><PUMP:MO");
        c.tick(now).await;
        c.link().transport().inject(b"DE:1>");
        c.tick(now).await;

        assert!(c.bank().get(Device::Pump).active());
        assert!(written(&c).starts_with("<ACK:PUMP>"));
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let mut c = controller(50, Mode::Off);
        c.link().transport().inject(b"<PING>");
        c.tick(Instant::now()).await;
        assert!(written(&c).starts_with("<PONG>"));
    }

    // -- Periodic jobs ------------------------------------------------------

    #[tokio::test]
    async fn state_sent_on_interval() {
        let mut c = controller(50, Mode::Off);
        let t0 = Instant::now();
        c.tick(t0).await;
        assert!(written(&c).is_empty(), "no push before the first interval");

        c.tick(t0 + Duration::from_secs(10)).await;
        let out = written(&c);
        assert!(out.starts_with("<DATA:{\"light\":75,\"moisture\":50"), "got {out}");
        assert!(out.contains("\"temp\":\"24.3\""));
    }

    #[tokio::test]
    async fn auto_control_waters_dry_soil() {
        let mut c = controller(10, Mode::Auto);
        c.tick(Instant::now()).await;
        assert!(c.bank().get(Device::Pump).active());
        assert!(written(&c).contains("\"pump\":1"));
    }
}
