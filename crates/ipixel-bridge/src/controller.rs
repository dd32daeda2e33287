//! [`Bridge`] – wires the control plane, the translator and the device
//! session together.
//!
//! Every inbound message on a known topic runs to completion in
//! this order: translate under the state lock, ensure the session and send
//! the resulting commands, publish the full state.

use std::sync::Arc;
use std::time::Duration;

use ipixel_session::SessionManager;
use ipixel_types::DeviceCommand;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::publisher::{ControlPlane, StatePublisher};
use crate::state::{StateSnapshot, StateStore};
use crate::topics::TopicSet;
use crate::translator;

/// Period of the unconditional state publish.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

pub struct Bridge {
    topics: TopicSet,
    state: Mutex<StateStore>,
    session: Arc<SessionManager>,
    publisher: StatePublisher,
}

impl Bridge {
    pub fn new(
        topics: TopicSet,
        session: Arc<SessionManager>,
        plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            publisher: StatePublisher::new(topics.clone(), plane),
            topics,
            state: Mutex::new(StateStore::new()),
            session,
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn state_snapshot(&self) -> StateSnapshot {
        self.state.lock().await.snapshot()
    }

    /// (Re)subscribe to every inbound topic and publish the current state.
    pub async fn on_connected(&self) {
        let plane = self.publisher.plane();
        let filters = self.topics.subscriptions();
        for filter in &filters {
            if let Err(e) = plane.subscribe(filter).await {
                warn!(filter = %filter, error = %e, "subscribe failed");
            }
        }
        info!(root = %self.topics.root(), subscriptions = filters.len(), "control plane connected");
        self.publish_states().await;
    }

    /// Handle one inbound control-plane message.
    ///
    /// Topics outside the device's tree are dropped without touching state
    /// or publishing.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some(key) = self.topics.resolve(topic) else {
            debug!(topic, "message on unowned topic dropped");
            return;
        };
        info!(topic, bytes = payload.len(), "control message received");

        let commands = {
            let mut state = self.state.lock().await;
            translator::translate(&key, payload, &mut state)
        };
        self.dispatch(&commands).await;
        self.publish_states().await;
    }

    /// Publish a consistent snapshot.  The state lock is held until every
    /// publish has been handed to the control plane.
    pub async fn publish_states(&self) {
        let state = self.state.lock().await;
        let snapshot = state.snapshot();
        self.publisher.publish(&snapshot).await;
        drop(state);
    }

    /// Start the periodic task: ensure the session once, then publish every
    /// `period` until the handle is aborted.
    pub fn spawn_periodic(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            if !bridge.session.ensure().await {
                warn!("device session not available at startup");
            }
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                bridge.publish_states().await;
            }
        })
    }

    async fn dispatch(&self, commands: &[DeviceCommand]) {
        if commands.is_empty() {
            return;
        }
        if !self.session.ensure().await {
            warn!(dropped = commands.len(), "device unreachable; commands dropped");
            return;
        }
        for cmd in commands {
            if let Err(e) = self.session.send(cmd).await {
                warn!(command = %cmd.command, error = %e, "command not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MemoryPlane;
    use ipixel_session::SessionConfig;
    use ipixel_session::sim::{SimSpawner, SimTransport};
    use ipixel_types::Attribute;
    use serde_json::json;

    const ROOT: &str = "ipixel/6554874a3e63";

    struct Rig {
        bridge: Arc<Bridge>,
        transport: SimTransport,
        spawner: SimSpawner,
        plane: MemoryPlane,
    }

    fn rig_with(transport: SimTransport, spawner: SimSpawner) -> Rig {
        let config = SessionConfig {
            connect_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
            recv_timeout: Duration::from_millis(20),
            error_backoff: Duration::from_millis(10),
            settle_delay: Duration::from_millis(10),
            spawn_min_interval: Duration::ZERO,
        };
        let session = Arc::new(SessionManager::new(
            Arc::new(transport.clone()),
            Arc::new(spawner.clone()),
            config,
        ));
        let plane = MemoryPlane::new();
        let bridge = Arc::new(Bridge::new(
            TopicSet::new("65:54:87:4A:3E:63"),
            session,
            Arc::new(plane.clone()),
        ));
        Rig {
            bridge,
            transport,
            spawner,
            plane,
        }
    }

    fn rig() -> Rig {
        rig_with(SimTransport::new(), SimSpawner::new())
    }

    fn topic(suffix: &str) -> String {
        format!("{ROOT}/{suffix}")
    }

    #[tokio::test]
    async fn on_connected_subscribes_then_publishes() {
        let rig = rig();
        rig.bridge.on_connected().await;

        let subs = rig.plane.subscriptions();
        assert!(subs.contains(&topic("set")));
        assert!(subs.contains(&topic("set/#")));
        assert!(subs.contains(&topic("send_text")));
        assert!(subs.contains(&topic("brightness/set")));
        assert_eq!(rig.plane.last_on(&topic("power/state")).as_deref(), Some("False"));
        assert_eq!(rig.plane.last_on(&topic("last_text")).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn power_on_then_text_reaches_device() {
        let rig = rig();
        rig.bridge.handle_message(&topic("power/set"), b"ON").await;
        rig.bridge.handle_message(&topic("send_text"), b"Hello").await;

        assert_eq!(
            rig.transport.sent_commands_without_pings(),
            vec![DeviceCommand::send_text(" "), DeviceCommand::send_text("Hello")]
        );
        assert_eq!(rig.plane.last_on(&topic("power/state")).as_deref(), Some("True"));
        assert_eq!(rig.plane.last_on(&topic("last_text")).as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn text_while_off_is_recorded_only() {
        let rig = rig();
        rig.bridge.handle_message(&topic("send_text"), b"quiet").await;

        assert!(rig.transport.sent_frames().is_empty());
        assert_eq!(rig.transport.connect_attempts(), 0);
        assert_eq!(rig.bridge.state_snapshot().await.last_text, "quiet");
        assert_eq!(rig.plane.last_on(&topic("last_text")).as_deref(), Some("quiet"));
    }

    #[tokio::test]
    async fn power_off_sends_one_clear() {
        let rig = rig();
        rig.bridge.handle_message(&topic("power/set"), b"on").await;
        rig.transport.clear_sent();
        rig.bridge.handle_message(&topic("power/set"), b"off").await;
        assert_eq!(rig.transport.sent_commands_without_pings(), vec![DeviceCommand::clear()]);
    }

    #[tokio::test]
    async fn subtopic_attribute_updates_state_and_publishes() {
        let rig = rig();
        rig.bridge.handle_message(&topic("set/brightness"), b"42").await;

        assert!(rig.transport.sent_frames().is_empty());
        assert_eq!(rig.bridge.state_snapshot().await.values[&Attribute::Brightness], json!(42));
        assert_eq!(rig.plane.last_on(&topic("brightness/state")).as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn attribute_set_topic_changes_only_that_attribute() {
        let rig = rig();
        let attrs = Attribute::ALL.into_iter().filter(|a| *a != Attribute::Power);

        for (i, attr) in attrs.enumerate() {
            let value = 100 + i as u64;
            let before = rig.bridge.state_snapshot().await;

            rig.bridge
                .handle_message(&topic(&format!("{attr}/set")), value.to_string().as_bytes())
                .await;

            let after = rig.bridge.state_snapshot().await;
            assert_eq!(after.values[&attr], json!(value), "{attr} not stored");
            for other in Attribute::ALL.into_iter().filter(|o| *o != attr) {
                assert_eq!(after.values[&other], before.values[&other], "{other} changed");
            }
            assert_eq!(after.last_text, before.last_text);

            let state_topic = topic(&format!("{attr}/state"));
            let published = value.to_string();
            assert_eq!(rig.plane.last_on(&state_topic), Some(published), "{attr} publish");
        }
        assert!(rig.transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn flat_command_sends_text_with_overrides() {
        let rig = rig();
        rig.bridge
            .handle_message(&topic("set"), br#"{"send_text":"Hi","color":"ff0000"}"#)
            .await;

        let sent = rig.transport.sent_commands_without_pings();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params[0], "Hi");
        assert!(sent[0].params.contains(&"color=ff0000".to_string()));
        assert_eq!(rig.plane.last_on(&topic("color/state")).as_deref(), Some("ff0000"));
    }

    #[tokio::test]
    async fn unknown_topic_has_no_effect() {
        let rig = rig();
        rig.bridge.handle_message("homeassistant/status", b"online").await;
        rig.bridge.handle_message(&topic("bogus/set"), b"1").await;

        assert!(rig.plane.published().is_empty());
        assert!(rig.transport.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn ignored_payload_on_known_topic_still_publishes() {
        let rig = rig();
        rig.bridge.handle_message(&topic("set"), b"not json").await;
        assert!(rig.transport.sent_frames().is_empty());
        assert!(!rig.plane.published().is_empty());
    }

    #[tokio::test]
    async fn unreachable_device_drops_commands_but_publishes_state() {
        let transport = SimTransport::new();
        transport.set_available(false);
        let rig = rig_with(transport, SimSpawner::new());

        rig.bridge.handle_message(&topic("power/set"), b"ON").await;

        assert_eq!(rig.spawner.spawn_count(), 1);
        assert!(rig.transport.sent_frames().is_empty());
        assert_eq!(rig.plane.last_on(&topic("power/state")).as_deref(), Some("True"));
    }

    #[tokio::test]
    async fn device_is_revived_by_spawning_the_controller() {
        let transport = SimTransport::new();
        transport.set_available(false);
        let spawner = SimSpawner::reviving(&transport);
        let rig = rig_with(transport, spawner);

        rig.bridge.handle_message(&topic("clear/set"), b"").await;

        assert_eq!(rig.spawner.spawn_count(), 1);
        assert_eq!(rig.transport.sent_commands_without_pings(), vec![DeviceCommand::clear()]);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let rig = rig();
        let a = {
            let bridge = Arc::clone(&rig.bridge);
            tokio::spawn(async move {
                bridge.handle_message(&topic("brightness/set"), b"10").await
            })
        };
        let b = {
            let bridge = Arc::clone(&rig.bridge);
            tokio::spawn(async move {
                bridge.handle_message(&topic("speed/set"), b"20").await
            })
        };
        a.await.unwrap();
        b.await.unwrap();

        let snapshot = rig.bridge.state_snapshot().await;
        assert_eq!(snapshot.values[&Attribute::Brightness], json!(10));
        assert_eq!(snapshot.values[&Attribute::Speed], json!(20));
    }

    #[tokio::test]
    async fn periodic_task_ensures_then_publishes_repeatedly() {
        let rig = rig();
        let handle = rig.bridge.spawn_periodic(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert!(rig.transport.connect_attempts() >= 1);
        let state_publishes = rig
            .plane
            .published()
            .iter()
            .filter(|p| p.topic == topic("state"))
            .count();
        assert!(state_publishes >= 2, "only {state_publishes} publishes");
    }
}
