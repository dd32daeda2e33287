//! `ipixel-types` – shared vocabulary for the iPixel bridge.
//!
//! - [`Attribute`] – the fixed set of independently settable display
//!   attributes, each with a typed default.
//! - [`DeviceCommand`] – the `{command, params}` frame understood by the
//!   controller process behind the device session.
//! - [`BridgeError`] – error type shared by every crate in the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// One named piece of device configuration.
///
/// Declaration order is the order used for per-attribute state publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Power,
    Brightness,
    Speed,
    Animation,
    Color,
    Font,
    MatrixHeight,
    FontSize,
    FontOffsetX,
    FontOffsetY,
}

impl Attribute {
    /// Every attribute, in declaration order.
    pub const ALL: [Attribute; 10] = [
        Attribute::Power,
        Attribute::Brightness,
        Attribute::Speed,
        Attribute::Animation,
        Attribute::Color,
        Attribute::Font,
        Attribute::MatrixHeight,
        Attribute::FontSize,
        Attribute::FontOffsetX,
        Attribute::FontOffsetY,
    ];

    /// Wire name used in topics and JSON documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Power => "power",
            Attribute::Brightness => "brightness",
            Attribute::Speed => "speed",
            Attribute::Animation => "animation",
            Attribute::Color => "color",
            Attribute::Font => "font",
            Attribute::MatrixHeight => "matrix_height",
            Attribute::FontSize => "font_size",
            Attribute::FontOffsetX => "font_offset_x",
            Attribute::FontOffsetY => "font_offset_y",
        }
    }

    /// The value this attribute holds until something sets it.
    pub fn default_value(self) -> Value {
        match self {
            Attribute::Power => json!(false),
            Attribute::Brightness => json!(80),
            Attribute::Speed => json!(75),
            Attribute::Animation => json!(1),
            Attribute::Color => json!("ffffff"),
            Attribute::Font => json!("gnufont"),
            Attribute::MatrixHeight => json!(16),
            Attribute::FontSize => Value::Null,
            Attribute::FontOffsetX => json!(0),
            Attribute::FontOffsetY => json!(0),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownAttribute(s.to_string()))
    }
}

/// Liveness probe, answered by nothing but a healthy socket.
pub const CMD_PING: &str = "ping";
/// Turn the display panel on.
pub const CMD_LED_ON: &str = "led_on";
/// Turn the display panel off.
pub const CMD_LED_OFF: &str = "led_off";
/// Remove every generated text from the display.
pub const CMD_CLEAR: &str = "clear";
/// Show a text; `params[0]` is the text, the rest are `key=value` overrides.
pub const CMD_SEND_TEXT: &str = "send_text";

/// A command frame for the device session transport.
///
/// Serialises to exactly `{"command": "<name>", "params": ["..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    pub params: Vec<String>,
}

impl DeviceCommand {
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }

    pub fn ping() -> Self {
        Self::new(CMD_PING, Vec::new())
    }

    pub fn led_on() -> Self {
        Self::new(CMD_LED_ON, Vec::new())
    }

    pub fn led_off() -> Self {
        Self::new(CMD_LED_OFF, Vec::new())
    }

    pub fn clear() -> Self {
        Self::new(CMD_CLEAR, Vec::new())
    }

    /// A bare text-display command.
    pub fn send_text(text: impl Into<String>) -> Self {
        Self::new(CMD_SEND_TEXT, vec![text.into()])
    }

    /// A text-display command followed by `key=value` overrides, in the
    /// order given.
    pub fn send_text_with<I, K, V>(text: impl Into<String>, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: fmt::Display,
        V: fmt::Display,
    {
        let mut params = vec![text.into()];
        params.extend(overrides.into_iter().map(|(k, v)| format!("{k}={v}")));
        Self::new(CMD_SEND_TEXT, params)
    }

    pub fn is_send_text(&self) -> bool {
        self.command == CMD_SEND_TEXT
    }

    /// The displayed text of a `send_text` command, without a leading
    /// `text=` key.
    ///
    /// Returns `None` for other commands or when `params` is empty.
    pub fn text(&self) -> Option<&str> {
        if !self.is_send_text() {
            return None;
        }
        let first = self.params.first()?;
        Some(first.strip_prefix("text=").unwrap_or(first))
    }

    /// Serialise to the JSON text sent over the session.
    pub fn to_frame(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}

/// Error type shared across the bridge.
///
/// Apart from [`BridgeError::Config`] at startup none of these are fatal;
/// callers log them and degrade.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("device transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("device session is not connected")]
    NotConnected,

    #[error("failed to spawn backing process: {0}")]
    Spawn(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("control plane error: {0}")]
    ControlPlane(String),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("configuration error: {0}")]
    Config(String),
}
