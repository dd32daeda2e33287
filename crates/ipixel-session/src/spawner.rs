//! Backing-process spawner.
//!
//! When the controller process is not listening, [`SessionManager::ensure`]
//! starts it through a [`ProcessSpawner`], fire-and-forget, and retries the
//! connection after a settle delay.
//!
//! [`SpawnThrottle`] bounds how often that happens so a controller that keeps
//! crashing on startup does not pile up processes.
//!
//! [`SessionManager::ensure`]: crate::SessionManager::ensure

use std::process::Stdio;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use ipixel_types::BridgeError;
use tokio::process::Command;
use tracing::{info, warn};

/// Starts the controller process that serves the device session.
pub trait ProcessSpawner: Send + Sync {
    /// Launch the process without waiting for it to become ready.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Spawn`] if the process could not be started.
    fn spawn(&self) -> Result<(), BridgeError>;
}

/// Runs `<launcher> -a <device-mac> --host <host> --server -p <port>` through
/// `sh -c`.
///
/// The launcher is a shell fragment (e.g. `python ./ipixelcli.py`) so it may
/// carry its own interpreter and arguments.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    launcher: String,
    device_mac: String,
    host: String,
    port: u16,
}

impl CommandSpawner {
    pub fn new(launcher: impl Into<String>, device_mac: impl Into<String>, port: u16) -> Self {
        Self {
            launcher: launcher.into(),
            device_mac: device_mac.into(),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Override the address the controller binds to (builder-style).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// The full shell command line.
    pub fn command_line(&self) -> String {
        format!(
            "{} -a {} --host {} --server -p {}",
            self.launcher, self.device_mac, self.host, self.port
        )
    }
}

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self) -> Result<(), BridgeError> {
        let line = self.command_line();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("`{line}`: {e}")))?;

        let pid = child.id();
        info!(pid = ?pid, command = %line, "backing process started");

        // Reap the child so it never lingers as a zombie.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => warn!(pid = ?pid, %status, "backing process exited"),
                Err(e) => warn!(pid = ?pid, error = %e, "failed to wait on backing process"),
            }
        });
        Ok(())
    }
}

/// Allows at most one spawn per `min_interval`.
///
/// A zero interval disables throttling.
pub struct SpawnThrottle {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl SpawnThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(min_interval).map(RateLimiter::direct),
        }
    }

    /// Claim the spawn slot.  Returns `false` while the previous spawn is
    /// still within `min_interval`.
    pub fn try_acquire(&self) -> bool {
        self.limiter.as_ref().is_none_or(|l| l.check().is_ok())
    }
}

impl std::fmt::Debug for SpawnThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnThrottle")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}
