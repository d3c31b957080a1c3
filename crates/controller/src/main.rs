mod actuator;
mod config;
mod controller;
mod relay;
mod sim;

use anyhow::{Context, Result};
use std::env;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plantcare_link::{Link, SerialTransport};

use actuator::ActuatorBank;
use controller::{Controller, Intervals};
use sim::{EnvironmentSim, Scenario};

/// Granularity of the cooperative loop. Every periodic job is gated on
/// elapsed time, so this only bounds how late a job can run.
const LOOP_TICK: Duration = Duration::from_millis(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Link ────────────────────────────────────────────────────────
    let transport = SerialTransport::open(&cfg.link.port, cfg.link.baud)
        .with_context(|| format!("failed to open serial port {}", cfg.link.port))?;
    let link = Link::new(transport, cfg.link_settings());

    // ── Actuators + sensors ─────────────────────────────────────────
    let mut bank = ActuatorBank::new(|d| cfg.actuator(d))?;
    bank.all_off();

    let scenario = Scenario::from_str_lossy(&cfg.sensors.scenario);
    let sensors = EnvironmentSim::new(scenario, cfg.sensors.diurnal_period_s);
    info!(%scenario, "environment simulator ready");

    let mut controller = Controller::new(
        link,
        bank,
        sensors,
        Intervals {
            sensor_read: Duration::from_millis(cfg.sensors.read_interval_ms),
            send: Duration::from_millis(cfg.link.send_interval_ms),
            health: Duration::from_millis(cfg.link.health_interval_ms),
        },
    );

    // ── Loop ────────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(LOOP_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(port = %cfg.link.port, "controller started");
    loop {
        tokio::select! {
            _ = ticker.tick() => controller.tick(Instant::now()).await,
            _ = &mut shutdown => break,
        }
    }

    info!(stats = ?controller.link().frame_stats(), "shutting down, relays off");
    controller.shutdown();
    Ok(())
}
