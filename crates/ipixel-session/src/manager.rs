//! [`SessionManager`] – owner of the single device session.
//!
//! State machine:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                  │
//!      └──────────── fail ────────┘◀── any failure ──┘
//! ```
//!
//! * The session is opened lazily by the first [`send`][SessionManager::send]
//!   or [`ensure`][SessionManager::ensure].
//! * [`connect`][SessionManager::connect] on a live session only probes it
//!   with a `ping`; it reconnects when the probe fails.
//! * [`ensure`][SessionManager::ensure] additionally starts the backing
//!   process once when a direct connect fails, waits for it to settle and
//!   tries again.
//! * Every successful connect starts one receive loop owned by that session.
//!   It drains unsolicited frames, logs the JSON ones and ends when its
//!   session is replaced or torn down.  [`listener_exited`] resolves once no
//!   loop is running.
//!
//! Connect, probe and send are serialised by one lock, and every network
//! call is bounded by a timeout from [`SessionConfig`].
//!
//! [`listener_exited`]: SessionManager::listener_exited

use std::sync::Arc;
use std::time::Duration;

use ipixel_types::{BridgeError, DeviceCommand};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::spawner::{ProcessSpawner, SpawnThrottle};
use crate::transport::{DeviceTransport, Frame, FrameSink, FrameStream};

/// Timing knobs for the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for opening the transport.
    pub connect_timeout: Duration,
    /// Upper bound for transmitting one frame.
    pub send_timeout: Duration,
    /// How long one receive-loop iteration waits for a frame.
    pub recv_timeout: Duration,
    /// Pause after a receive error before the loop exits.
    pub error_backoff: Duration,
    /// Wait between spawning the backing process and reconnecting.
    pub settle_delay: Duration,
    /// Minimum time between two backing-process spawns.
    pub spawn_min_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
            spawn_min_interval: Duration::from_secs(30),
        }
    }
}

/// Connection state of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
struct Slot {
    sink: Option<Box<dyn FrameSink>>,
}

struct Shared {
    transport: Arc<dyn DeviceTransport>,
    spawner: Arc<dyn ProcessSpawner>,
    throttle: SpawnThrottle,
    config: SessionConfig,
    slot: Mutex<Slot>,
    state: watch::Sender<SessionState>,
    /// Bumped on every connect and every teardown.  A receive loop only
    /// lives while the generation it was started for is current.
    generation: watch::Sender<u64>,
    /// Number of receive loops still running.
    listeners: watch::Sender<usize>,
}

impl Shared {
    fn bump_generation(&self) -> u64 {
        self.generation.send_modify(|g| *g += 1);
        *self.generation.borrow()
    }

    async fn teardown(&self, slot: &mut Slot) {
        if let Some(mut sink) = slot.sink.take() {
            let _ = timeout(self.config.send_timeout, sink.close()).await;
            info!(endpoint = %self.transport.endpoint(), "device session closed");
        }
        self.bump_generation();
        self.state.send_replace(SessionState::Disconnected);
    }

    async fn teardown_if_current(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if *self.generation.borrow() == generation {
            self.teardown(&mut slot).await;
        }
    }
}

/// Owner of the device session.  Share it behind an [`Arc`].
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        spawner: Arc<dyn ProcessSpawner>,
        config: SessionConfig,
    ) -> Self {
        let throttle = SpawnThrottle::new(config.spawn_min_interval);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (generation, _) = watch::channel(0);
        let (listeners, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                transport,
                spawner,
                throttle,
                config,
                slot: Mutex::new(Slot::default()),
                state,
                generation,
                listeners,
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Number of receive loops currently running (0 or 1 once settled).
    pub fn active_listeners(&self) -> usize {
        *self.shared.listeners.borrow()
    }

    /// Resolve once no receive loop is running.
    pub async fn listener_exited(&self) {
        let mut rx = self.shared.listeners.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Make sure a session is up, starting the backing process if needed.
    ///
    /// Never fails loudly: returns `false` when the session is still down
    /// after the respawn attempt.
    pub async fn ensure(&self) -> bool {
        match self.connect().await {
            Ok(()) => return true,
            Err(e) => debug!(error = %e, "direct connect failed"),
        }

        if self.shared.throttle.try_acquire() {
            if let Err(e) = self.shared.spawner.spawn() {
                warn!(error = %e, "could not start backing process");
            }
        } else {
            warn!(
                min_interval = ?self.shared.config.spawn_min_interval,
                "backing process spawned recently; not spawning again"
            );
        }
        sleep(self.shared.config.settle_delay).await;

        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    error = %e,
                    endpoint = %self.shared.transport.endpoint(),
                    "device session unavailable"
                );
                false
            }
        }
    }

    /// Open the session, or probe it with a `ping` if already open.
    ///
    /// A failed probe tears the session down and opens a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] or [`BridgeError::Timeout`] when no
    /// session could be opened.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let mut slot = self.shared.slot.lock().await;
        if let Some(sink) = slot.sink.as_deref_mut() {
            match write_frame(sink, &DeviceCommand::ping(), self.shared.config.send_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "liveness probe failed; reconnecting");
                    self.shared.teardown(&mut slot).await;
                }
            }
        }
        self.open(&mut slot).await
    }

    /// Send one command, opening the session first if none is up.
    ///
    /// On failure the session is dropped and the error returned; there is no
    /// retry here.  The next `ensure` or `send` reconnects.
    pub async fn send(&self, command: &DeviceCommand) -> Result<(), BridgeError> {
        let mut slot = self.shared.slot.lock().await;
        if slot.sink.is_none() {
            if let Err(e) = self.open(&mut slot).await {
                warn!(command = %command.command, error = %e, "cannot send; no device session");
                return Err(e);
            }
        }
        let Some(sink) = slot.sink.as_deref_mut() else {
            return Err(BridgeError::NotConnected);
        };

        match write_frame(sink, command, self.shared.config.send_timeout).await {
            Ok(()) => {
                match command.text() {
                    Some(text) => info!(text = %text, params = ?&command.params[1..], "sent text"),
                    None => info!(
                        command = %command.command,
                        params = ?command.params,
                        "sent command"
                    ),
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    command = %command.command,
                    error = %e,
                    "send failed; dropping device session"
                );
                self.shared.teardown(&mut slot).await;
                Err(e)
            }
        }
    }

    /// Close the session if one is open.
    pub async fn disconnect(&self) {
        let mut slot = self.shared.slot.lock().await;
        self.shared.teardown(&mut slot).await;
    }

    async fn open(&self, slot: &mut Slot) -> Result<(), BridgeError> {
        let shared = &self.shared;
        let endpoint = shared.transport.endpoint();
        shared.state.send_replace(SessionState::Connecting);

        let connect = timeout(shared.config.connect_timeout, shared.transport.connect());
        let result = match connect.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(format!("connect to {endpoint}"))),
        };

        match result {
            Ok((sink, stream)) => {
                let generation = shared.bump_generation();
                slot.sink = Some(sink);
                shared.state.send_replace(SessionState::Connected);
                info!(endpoint = %endpoint, generation, "device session connected");

                shared.listeners.send_modify(|n| *n += 1);
                tokio::spawn(receive_loop(Arc::clone(shared), stream, generation));
                Ok(())
            }
            Err(e) => {
                shared.state.send_replace(SessionState::Disconnected);
                warn!(endpoint = %endpoint, error = %e, "device session connect failed");
                Err(e)
            }
        }
    }
}

async fn write_frame(
    sink: &mut dyn FrameSink,
    command: &DeviceCommand,
    limit: Duration,
) -> Result<(), BridgeError> {
    let frame = command.to_frame()?;
    match timeout(limit, sink.send_text(frame)).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Timeout(format!("send `{}`", command.command))),
    }
}

async fn receive_loop(shared: Arc<Shared>, mut stream: Box<dyn FrameStream>, generation: u64) {
    let mut current = shared.generation.subscribe();
    loop {
        if *current.borrow_and_update() != generation {
            debug!(generation, "session replaced; receive loop done");
            break;
        }
        tokio::select! {
            changed = current.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            received = timeout(shared.config.recv_timeout, stream.next_frame()) => {
                let failure = match received {
                    // Quiet link.
                    Err(_) => continue,
                    Ok(Some(Ok(Frame::Text(text)))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(json) => info!(message = %json, "received from device"),
                            Err(_) => debug!(len = text.len(), "ignoring non-JSON text frame"),
                        }
                        continue;
                    }
                    Ok(Some(Ok(_))) => continue,
                    Ok(Some(Err(e))) => e,
                    Ok(None) => BridgeError::Transport("device session stream ended".to_string()),
                };
                warn!(error = %failure, "receive loop ended");
                shared.teardown_if_current(generation).await;
                sleep(shared.config.error_backoff).await;
                break;
            }
        }
    }
    shared.listeners.send_modify(|n| *n = n.saturating_sub(1));
}
