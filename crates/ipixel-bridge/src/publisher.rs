//! State publishing over the control plane.
//!
//! [`ControlPlane`] is the seam between the bridge and the MQTT client so the
//! controller can be driven headless; [`MemoryPlane`] records everything for
//! tests and dry runs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipixel_types::{Attribute, BridgeError};
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, warn};

use crate::state::{StateSnapshot, render_value};
use crate::topics::TopicSet;

/// Publish/subscribe half of the control-plane client.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retained: bool,
    ) -> Result<(), BridgeError>;

    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError>;
}

#[async_trait]
impl ControlPlane for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retained: bool,
    ) -> Result<(), BridgeError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retained, payload)
            .await
            .map_err(|e| BridgeError::ControlPlane(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        AsyncClient::subscribe(self, filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| BridgeError::ControlPlane(e.to_string()))
    }
}

/// One message handed to a [`MemoryPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

/// A control plane that keeps every publish and subscription in memory.
/// Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlane {
    published: Arc<Mutex<Vec<Published>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MemoryPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }

    /// Payload of the most recent publish on `topic`.
    pub fn last_on(&self, topic: &str) -> Option<String> {
        lock(&self.published)
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn clear(&self) {
        lock(&self.published).clear();
        lock(&self.subscriptions).clear();
    }
}

#[async_trait]
impl ControlPlane for MemoryPlane {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retained: bool,
    ) -> Result<(), BridgeError> {
        lock(&self.published).push(Published {
            topic: topic.to_string(),
            payload,
            retained,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        lock(&self.subscriptions).push(filter.to_string());
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Renders a [`StateSnapshot`] onto the state topics.
pub struct StatePublisher {
    topics: TopicSet,
    plane: Arc<dyn ControlPlane>,
}

impl StatePublisher {
    pub fn new(topics: TopicSet, plane: Arc<dyn ControlPlane>) -> Self {
        Self { topics, plane }
    }

    pub fn plane(&self) -> &Arc<dyn ControlPlane> {
        &self.plane
    }

    /// Publish every attribute, the aggregate document and the last text,
    /// all retained.
    ///
    /// A failed publish is logged and the rest still go out.  Returns the
    /// number of failures.
    pub async fn publish(&self, snapshot: &StateSnapshot) -> usize {
        let mut failures = 0;

        for attr in Attribute::ALL {
            let value = snapshot.values.get(&attr).cloned().unwrap_or_else(|| attr.default_value());
            let topic = self.topics.attribute_state(attr);
            failures += self.put(&topic, render_value(&value)).await;
        }

        failures += self
            .put(self.topics.state(), snapshot.to_json().to_string())
            .await;
        failures += self
            .put(self.topics.last_text(), snapshot.last_text.clone())
            .await;

        debug!(failures, "state published");
        failures
    }

    async fn put(&self, topic: &str, payload: String) -> usize {
        match self.plane.publish(topic, payload, true).await {
            Ok(()) => 0,
            Err(e) => {
                warn!(topic, error = %e, "state publish failed");
                1
            }
        }
    }
}
