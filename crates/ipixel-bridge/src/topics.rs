//! MQTT topic layout for one device.
//!
//! Root: `ipixel/<device-id>` with the device id lower-cased and its
//! separators stripped.
//!
//! | Purpose | Topic | Direction |
//! |---|---|---|
//! | Aggregate command | `<root>/set` | in |
//! | Subtopic command | `<root>/set/<key>` | in |
//! | Per-attribute set | `<root>/<attr>/set` | in |
//! | Clear display | `<root>/clear/set` | in |
//! | Direct text | `<root>/send_text` | in |
//! | Aggregate state | `<root>/state` | out, retained |
//! | Per-attribute state | `<root>/<attr>/state` | out, retained |
//! | Last text | `<root>/last_text` | out, retained |

use ipixel_types::Attribute;

/// Key of the direct text topic and of the flat-dialect text field.
pub const SEND_TEXT_KEY: &str = "send_text";
/// Key of the clear topic.
pub const CLEAR_KEY: &str = "clear";

/// Canonical key an inbound topic resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKey {
    /// The base command topic `<root>/set`.
    Set,
    /// An attribute, `send_text`, `clear`, or any `<root>/set/<key>` suffix.
    Named(String),
}

impl TopicKey {
    pub fn named(key: impl Into<String>) -> Self {
        TopicKey::Named(key.into())
    }
}

/// Lower-case a device MAC and strip `:`, `-` and `.` separators.
pub fn normalize_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Every topic the bridge uses, derived once from the device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    device_id: String,
    root: String,
    command: String,
    state: String,
    last_text: String,
}

impl TopicSet {
    pub fn new(device_mac: &str) -> Self {
        let device_id = normalize_device_id(device_mac);
        let root = format!("ipixel/{device_id}");
        Self {
            command: format!("{root}/set"),
            state: format!("{root}/state"),
            last_text: format!("{root}/last_text"),
            device_id,
            root,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>/set`
    pub fn command(&self) -> &str {
        &self.command
    }

    /// `<root>/state`
    pub fn state(&self) -> &str {
        &self.state
    }

    /// `<root>/last_text`
    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    /// `<root>/send_text`
    pub fn send_text(&self) -> String {
        format!("{}/{SEND_TEXT_KEY}", self.root)
    }

    /// `<root>/<attr>`
    pub fn attribute(&self, attr: Attribute) -> String {
        format!("{}/{}", self.root, attr.as_str())
    }

    /// `<root>/<attr>/set`
    pub fn attribute_set(&self, attr: Attribute) -> String {
        format!("{}/set", self.attribute(attr))
    }

    /// `<root>/<attr>/state`
    pub fn attribute_state(&self, attr: Attribute) -> String {
        format!("{}/state", self.attribute(attr))
    }

    /// Filters to subscribe to on every (re)connect.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut subs = vec![self.command.clone(), format!("{}/#", self.command)];
        subs.extend(Attribute::ALL.into_iter().map(|a| self.attribute_set(a)));
        subs.push(format!("{}/{SEND_TEXT_KEY}/set", self.root));
        subs.push(format!("{}/{CLEAR_KEY}/set", self.root));
        subs.push(self.send_text());
        subs
    }

    /// Map an inbound topic to its canonical key.
    ///
    /// Returns `None` for topics the bridge does not own.
    pub fn resolve(&self, topic: &str) -> Option<TopicKey> {
        if topic == self.command {
            return Some(TopicKey::Set);
        }
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;

        if let Some(key) = rest.strip_prefix("set/") {
            return (!key.is_empty()).then(|| TopicKey::named(key));
        }
        if rest == SEND_TEXT_KEY {
            return Some(TopicKey::named(SEND_TEXT_KEY));
        }
        let name = rest.strip_suffix("/set")?;
        let known = name == SEND_TEXT_KEY
            || name == CLEAR_KEY
            || name.parse::<Attribute>().is_ok();
        known.then(|| TopicKey::named(name))
    }
}
