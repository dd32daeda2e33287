//! `ipixel-bridge` – MQTT front end for the iPixel display.
//!
//! Maps Home Assistant style control topics onto device commands and keeps
//! the retained state topics current.
//!
//! # Modules
//!
//! - [`state`] – [`StateStore`], the canonical attribute values.
//! - [`topics`] – [`TopicSet`], topic layout and inbound topic resolution.
//! - [`translator`] – pure message-to-command translation.
//! - [`publisher`] – [`ControlPlane`] seam and [`StatePublisher`].
//! - [`controller`] – [`Bridge`], which ties it all to a device session.
//! - [`mqtt`] – rumqttc client options, event loop and dispatcher.

pub mod controller;
pub mod mqtt;
pub mod publisher;
pub mod state;
pub mod topics;
pub mod translator;

pub use controller::{Bridge, DEFAULT_PUBLISH_INTERVAL};
pub use mqtt::{ControlEvent, MqttSettings};
pub use publisher::{ControlPlane, MemoryPlane, StatePublisher};
pub use state::{StateSnapshot, StateStore};
pub use topics::{TopicKey, TopicSet};
pub use translator::SetPayload;
