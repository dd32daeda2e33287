//! `ipixel-session` – the device session.
//!
//! Owns the single WebSocket connection to the local iPixel controller
//! process and keeps it alive lazily: nothing reconnects on its own, the next
//! outbound command does.
//!
//! # Modules
//!
//! - [`transport`] – [`DeviceTransport`] seam and the tokio-tungstenite
//!   [`WsTransport`] implementation.
//! - [`spawner`] – [`ProcessSpawner`] for the backing controller process and
//!   the [`SpawnThrottle`] that bounds how often it is started.
//! - [`manager`] – [`SessionManager`]: lazy connect, liveness probe,
//!   respawn-on-failure, outbound send and the supervised receive loop.
//! - [`sim`] – in-process doubles for headless tests.

pub mod manager;
pub mod sim;
pub mod spawner;
pub mod transport;

pub use manager::{SessionConfig, SessionManager, SessionState};
pub use spawner::{CommandSpawner, ProcessSpawner, SpawnThrottle};
pub use transport::{DeviceTransport, Frame, FrameSink, FrameStream, WsTransport};
