//! rumqttc glue.
//!
//! The event loop task only polls the broker connection and forwards what
//! matters into a channel; a separate dispatcher task feeds the [`Bridge`].
//! This keeps keep-alives flowing while a message handler waits on a slow
//! device connect.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Transport};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::controller::Bridge;
use crate::topics::TopicSet;

/// Keep-alive interval negotiated with the broker.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
/// Pause before polling again after a connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Capacity of the client request queue.
pub const REQUEST_CAPACITY: usize = 64;

/// Broker connection parameters.
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub client_id: String,
}

impl MqttSettings {
    /// Settings with the conventional `ipixel_<device-id>` client id.
    pub fn for_device(topics: &TopicSet, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: false,
            client_id: format!("ipixel_{}", topics.device_id()),
        }
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("tls", &self.tls)
            .field("client_id", &self.client_id)
            .finish()
    }
}

pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut opts = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    opts.set_keep_alive(KEEP_ALIVE);

    if let Some(user) = settings.username.as_deref().filter(|u| !u.is_empty()) {
        opts.set_credentials(user, settings.password.clone().unwrap_or_default());
    }
    if settings.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

/// Create the client and its event loop.
pub fn connect(settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY)
}

/// What the dispatcher acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The broker accepted the connection (first connect or reconnect).
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

/// Poll the broker connection forever, forwarding connects and publishes.
///
/// rumqttc reconnects on the next poll after an error; this waits
/// [`RECONNECT_DELAY`] in between.  Returns when the dispatcher is gone.
pub async fn run_event_loop(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<ControlEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "broker connection established");
                ControlEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => ControlEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(other) => {
                debug!(event = ?other, "mqtt event");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "mqtt connection error; retrying");
                sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        if tx.send(event).is_err() {
            debug!("dispatcher gone; stopping event loop");
            return;
        }
    }
}

/// Feed control events into the bridge, one at a time, until the channel
/// closes.
pub async fn run_dispatcher(bridge: Arc<Bridge>, mut rx: mpsc::UnboundedReceiver<ControlEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ControlEvent::Connected => bridge.on_connected().await,
            ControlEvent::Message { topic, payload } => {
                bridge.handle_message(&topic, &payload).await
            }
        }
    }
    debug!("control event channel closed");
}
