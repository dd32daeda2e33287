//! Device transport seam.
//!
//! The [`SessionManager`][crate::SessionManager] never touches a socket
//! directly.  It asks a [`DeviceTransport`] for a connected pair of halves
//! and applies its own timeouts around every call.
//!
//! - [`WsTransport`] – connects to `ws://host:port` with tokio-tungstenite.
//! - [`SimTransport`][crate::sim::SimTransport] – in-process double.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ipixel_types::BridgeError;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// One inbound unit from the device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Ping, pong or raw frames; carry nothing the bridge cares about.
    Control,
}

/// Outbound half of a connected session.
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError>;

    /// Close the connection.  Errors are swallowed; the half is dropped
    /// right after.
    async fn close(&mut self);
}

/// Inbound half of a connected session.
#[async_trait]
pub trait FrameStream: Send {
    /// Wait for the next frame.
    ///
    /// Returns `None` once the peer has gone away for good.  Must be
    /// cancel-safe: the receive loop drops the future on every timeout.
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>>;
}

/// Anything that can open a session to the controller process.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Human-readable address, used in log fields.
    fn endpoint(&self) -> String;

    /// Open a new session and split it into its two halves.
    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), BridgeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// WebSocket transport
// ────────────────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for the controller process started with `--server`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Target `ws://host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
        }
    }

    /// Target the controller on the loopback interface.
    pub fn local(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeviceTransport for WsTransport {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), BridgeError> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BridgeError::Transport(format!("ws connect to {}: {e}", self.url)))?;
        let (tx, rx) = ws.split();
        Ok((Box::new(WsSink(tx)), Box::new(WsFrames(rx))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), BridgeError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Transport(format!("ws send: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<Frame, BridgeError>> {
        let msg = self.0.next().await?;
        Some(match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Ok(Frame::Binary(bytes.to_vec())),
            Ok(Message::Close(_)) => Err(BridgeError::Transport("ws closed by peer".to_string())),
            Ok(_) => Ok(Frame::Control),
            Err(e) => Err(BridgeError::Transport(format!("ws receive: {e}"))),
        })
    }
}
