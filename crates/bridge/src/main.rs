mod link_task;
mod state;
mod web;

use anyhow::{Context, Result};
use std::{env, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plantcare_link::{Link, LinkSettings, SerialTransport};

use link_task::LinkWorker;
use state::BridgeState;
use web::AppState;

/// How often the link worker drains the serial port.
const LINK_POLL: Duration = Duration::from_millis(10);

/// Mode commands waiting for the link; a full queue answers 503.
const COMMAND_QUEUE: usize = 16;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let web_port: u16 = env_or("WEB_PORT", 8080);
    let link_port = env::var("LINK_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());
    let baud: u32 = env_or("LINK_BAUD", 115_200);
    let defaults = LinkSettings::bridge();
    let settings = LinkSettings {
        frame_capacity: env_or("LINK_FRAME_CAPACITY", defaults.frame_capacity),
        partial_timeout: Duration::from_millis(env_or("LINK_PARTIAL_TIMEOUT_MS", 2000)),
        salvage_truncated: env_or("LINK_SALVAGE", true),
        ..defaults
    };
    let health_every = Duration::from_secs(env_or("LINK_HEALTH_INTERVAL_S", 60));

    // ── Shared state (ephemeral, for the API) ───────────────────────
    let shared = Arc::new(RwLock::new(BridgeState::new()));
    shared
        .write()
        .await
        .record_system("bridge started".to_string());

    // ── Link to the controller ──────────────────────────────────────
    let transport = SerialTransport::open(&link_port, baud)
        .with_context(|| format!("failed to open serial port {link_port}"))?;
    let link = Link::new(transport, settings);
    let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
    let worker = LinkWorker::new(link, Arc::clone(&shared), rx, health_every);
    tokio::spawn(worker.run(LINK_POLL));
    info!(port = %link_port, baud, "link worker spawned");

    // ── Web server ──────────────────────────────────────────────────
    web::serve(AppState { shared, commands }, web_port).await
}
