//! `ipixel-bridge` – MQTT bridge for an iPixel LED display.
//!
//! 1. Loads configuration from `ipixel.toml` and the environment.
//! 2. Connects to the broker and subscribes to the device's control topics.
//! 3. Drives the display through the local controller's WebSocket server,
//!    starting the controller when it is not running.
//! 4. Republishes the full state every publish interval.
//! 5. On Ctrl-C disconnects from the broker and exits.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ipixel_bridge::{Bridge, TopicSet, mqtt};
use ipixel_session::{CommandSpawner, SessionConfig, SessionManager, WsTransport};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("ipixel-bridge");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, path = %config::config_path().display(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(config = ?cfg, "starting iPixel bridge");

    let topics = TopicSet::new(&cfg.device_mac);
    let transport = WsTransport::local(cfg.ws_port);
    let spawner = CommandSpawner::new(&cfg.launcher, &cfg.device_mac, cfg.ws_port);
    info!(
        endpoint = %transport.url(),
        launcher = %spawner.command_line(),
        "device session configured"
    );
    let session = Arc::new(SessionManager::new(
        Arc::new(transport),
        Arc::new(spawner),
        SessionConfig::default(),
    ));

    let settings = cfg.mqtt_settings(&topics);
    info!(
        broker = %settings.host,
        port = settings.port,
        tls = settings.tls,
        client_id = %settings.client_id,
        "connecting to broker"
    );
    let (client, eventloop) = mqtt::connect(&settings);
    let bridge = Arc::new(Bridge::new(topics, Arc::clone(&session), Arc::new(client.clone())));

    let (tx, rx) = mpsc::unbounded_channel();
    let mut event_loop = tokio::spawn(mqtt::run_event_loop(eventloop, tx));
    let dispatcher = tokio::spawn(mqtt::run_dispatcher(Arc::clone(&bridge), rx));
    let periodic = bridge.spawn_periodic(cfg.publish_interval());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C; shutting down");
    }
    info!("shutting down");

    periodic.abort();
    dispatcher.abort();
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "broker disconnect failed");
    }
    // Let the event loop flush the DISCONNECT packet.
    if timeout(SHUTDOWN_GRACE, &mut event_loop).await.is_err() {
        event_loop.abort();
    }
    session.disconnect().await;

    ExitCode::SUCCESS
}
