//! In-process doubles for running the bridge without a controller process.
//!
//! [`SimTransport`] records every frame sent to it, can refuse connections,
//! fail sends and have inbound frames injected.  [`SimSpawner`] counts spawn
//! requests and can bring a [`SimTransport`] back online, mimicking a
//! controller that starts listening once launched.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ipixel_session::sim::{SimSpawner, SimTransport};
//! use ipixel_session::{SessionConfig, SessionManager};
//! use ipixel_types::DeviceCommand;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = SimTransport::new();
//! let session = SessionManager::new(
//!     Arc::new(transport.clone()),
//!     Arc::new(SimSpawner::new()),
//!     SessionConfig::default(),
//! );
//! session.send(&DeviceCommand::clear()).await.unwrap();
//! assert_eq!(transport.sent_commands(), vec![DeviceCommand::clear()]);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipixel_types::{BridgeError, DeviceCommand};
use tokio::sync::mpsc;

use crate::spawner::ProcessSpawner;
use crate::transport::{DeviceTransport, Frame, FrameSink, FrameStream};

type Inbound = Result<Frame, BridgeError>;

// ────────────────────────────────────────────────────────────────────────────
// Simulated transport
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimInner {
    available: AtomicBool,
    fail_sends: AtomicBool,
    connect_attempts: AtomicUsize,
    /// One-shot connect outcomes consumed before `available` is consulted.
    script: Mutex<VecDeque<bool>>,
    sent: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
}

/// A device transport living entirely in memory.  Clones share state.
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<SimInner>,
}

impl SimTransport {
    /// A transport that accepts every connection.
    pub fn new() -> Self {
        let inner = SimInner::default();
        inner.available.store(true, Ordering::SeqCst);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Accept (`true`) or refuse (`false`) future connections.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Queue one-shot connect outcomes consulted before the availability flag.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        lock(&self.inner.script).extend(outcomes);
    }

    /// Make every send on any open session fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Raw frames successfully sent, oldest first.
    pub fn sent_frames(&self) -> Vec<String> {
        lock(&self.inner.sent).clone()
    }

    /// Sent frames decoded as [`DeviceCommand`]s.  Frames that do not decode
    /// are skipped.
    pub fn sent_commands(&self) -> Vec<DeviceCommand> {
        lock(&self.inner.sent)
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Sent commands without liveness probes.
    pub fn sent_commands_without_pings(&self) -> Vec<DeviceCommand> {
        self.sent_commands()
            .into_iter()
            .filter(|c| *c != DeviceCommand::ping())
            .collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.inner.sent).clear();
    }

    /// Deliver an inbound frame (or error) on the latest session.
    ///
    /// Returns `false` when no session has been opened yet.
    pub fn inject(&self, frame: Inbound) -> bool {
        lock(&self.inner.inbound)
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// End the latest session's inbound stream, as if the peer vanished.
    pub fn close_stream(&self) {
        lock(&self.inner.inbound).take();
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for SimTransport {
    fn endpoint(&self) -> String {
        "sim://device".to_string()
    }

    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), BridgeError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let accept = lock(&self.inner.script)
            .pop_front()
            .unwrap_or_else(|| self.inner.available.load(Ordering::SeqCst));
        if !accept {
            return Err(BridgeError::Transport("sim: connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.inbound) = Some(tx);
        Ok((
            Box::new(SimSink {
                inner: Arc::clone(&self.inner),
            }),
            Box::new(SimStream { rx }),
        ))
    }
}

struct SimSink {
    inner: Arc<SimInner>,
}

#[async_trait]
impl FrameSink for SimSink {
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("sim: broken pipe".to_string()));
        }
        lock(&self.inner.sent).push(text);
        Ok(())
    }

    async fn close(&mut self) {}
}

struct SimStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameStream for SimStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>> {
        self.rx.recv().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated spawner
// ────────────────────────────────────────────────────────────────────────────

/// Counts spawn requests.  Clones share the counter.
#[derive(Clone, Default)]
pub struct SimSpawner {
    spawns: Arc<AtomicUsize>,
    revives: Option<SimTransport>,
    fail: bool,
}

impl SimSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A spawner whose process makes `transport` accept connections again.
    pub fn reviving(transport: &SimTransport) -> Self {
        Self {
            revives: Some(transport.clone()),
            ..Self::default()
        }
    }

    /// A spawner that always reports a launch failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl ProcessSpawner for SimSpawner {
    fn spawn(&self) -> Result<(), BridgeError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::Spawn("sim: launcher not found".to_string()));
        }
        if let Some(transport) = &self.revives {
            transport.set_available(true);
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
