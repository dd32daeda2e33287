//! Command translator.
//!
//! Turns one inbound control message into a [`StateStore`] mutation and the
//! list of [`DeviceCommand`]s to send, in order.  Pure: no I/O happens here,
//! the [`Bridge`][crate::Bridge] performs the sends.
//!
//! Dispatch, by topic key:
//!
//! 1. `set` with a JSON object, see [`SetPayload`]:
//!    * structured `{"command", "params"}` is forwarded verbatim; a
//!      `send_text` also records its text;
//!    * flat `{"send_text": ..., <attr>: ...}` records the text, merges the
//!      attributes and sends one canonical `send_text` with overrides.
//! 2. `send_text` records the text and sends it if the display is powered.
//! 3. `power` stores the parsed boolean and sends a blank text (on) or
//!    `clear` (off).
//! 4. `clear` sends `clear`.
//! 5. Any other attribute stores the value; nothing is sent.
//! 6. Everything else is ignored.

use ipixel_types::{Attribute, DeviceCommand};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::state::StateStore;
use crate::topics::{CLEAR_KEY, SEND_TEXT_KEY, TopicKey};

/// Attributes appended as `key=value` to a flat-dialect text command, in
/// this order.
pub const TEXT_OVERRIDES: [Attribute; 5] = [
    Attribute::Color,
    Attribute::Speed,
    Attribute::Animation,
    Attribute::Font,
    Attribute::MatrixHeight,
];

/// Payload tokens (upper-cased) that switch the display on.
pub const POWER_ON_TOKENS: [&str; 3] = ["ON", "1", "TRUE"];

/// The two dialects accepted on the base command topic.
#[derive(Debug, Clone, PartialEq)]
pub enum SetPayload {
    /// `{"command": "<name>", "params": ["..."]}`, forwarded as-is.
    Structured(DeviceCommand),
    /// `{"send_text": "<text>", "color": ..., ...}`.
    FlatText { text: String, fields: Map<String, Value> },
    /// Not a JSON object, or neither dialect.
    Ignored,
}

impl SetPayload {
    pub fn parse(payload: &str) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(payload) else {
            return SetPayload::Ignored;
        };

        if fields.contains_key("command") && fields.contains_key("params") {
            return match structured_command(&fields) {
                Some(cmd) => SetPayload::Structured(cmd),
                None => SetPayload::Ignored,
            };
        }

        match fields.get(SEND_TEXT_KEY) {
            Some(text) => SetPayload::FlatText {
                text: text_of(text),
                fields,
            },
            None => SetPayload::Ignored,
        }
    }
}

fn structured_command(fields: &Map<String, Value>) -> Option<DeviceCommand> {
    let command = fields.get("command")?.as_str()?;
    let params = fields
        .get("params")?
        .as_array()?
        .iter()
        .map(text_of)
        .collect();
    Some(DeviceCommand::new(command, params))
}

/// Text form of a JSON value as the device expects it: strings unquoted,
/// anything else as JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a power payload means "on".  JSON scalars are judged by their
/// text form, so `true`, `1` and `"ON"` all count.
pub fn parse_power(raw: &str) -> bool {
    let text = match serde_json::from_str::<Value>(raw) {
        Ok(value) => text_of(&value),
        Err(_) => raw.to_string(),
    };
    let token = text.to_uppercase();
    POWER_ON_TOKENS.contains(&token.as_str())
}

/// Apply one inbound message to `state` and return the commands to send.
pub fn translate(key: &TopicKey, payload: &[u8], state: &mut StateStore) -> Vec<DeviceCommand> {
    let raw = String::from_utf8_lossy(payload);
    debug!(key = ?key, payload = %raw, "translating control message");

    let name = match key {
        TopicKey::Set => return translate_set(&raw, state),
        TopicKey::Named(name) => name.as_str(),
    };

    match name {
        SEND_TEXT_KEY => {
            let text = match serde_json::from_str::<Value>(&raw) {
                Ok(value) => text_of(&value),
                Err(_) => raw.into_owned(),
            };
            state.set_last_text(text.clone());
            if state.is_powered() {
                vec![DeviceCommand::send_text(text)]
            } else {
                debug!("display is off; text recorded but not sent");
                Vec::new()
            }
        }
        CLEAR_KEY => vec![DeviceCommand::clear()],
        other => match other.parse::<Attribute>() {
            Ok(Attribute::Power) => {
                let on = parse_power(&raw);
                state.set(Attribute::Power, Value::Bool(on));
                info!(on, "power set");
                if on {
                    vec![DeviceCommand::send_text(" ")]
                } else {
                    vec![DeviceCommand::clear()]
                }
            }
            Ok(attr) => {
                let value = serde_json::from_str::<Value>(&raw)
                    .unwrap_or_else(|_| Value::String(raw.into_owned()));
                info!(attribute = %attr, value = %value, "attribute updated");
                state.set(attr, value);
                Vec::new()
            }
            Err(_) => {
                debug!(key = other, "ignoring unknown key");
                Vec::new()
            }
        },
    }
}

fn translate_set(raw: &str, state: &mut StateStore) -> Vec<DeviceCommand> {
    match SetPayload::parse(raw) {
        SetPayload::Structured(cmd) => {
            if let Some(text) = cmd.text() {
                info!(text, "text extracted from structured command");
                state.set_last_text(text);
            }
            info!(command = %cmd.command, "forwarding structured command");
            vec![cmd]
        }
        SetPayload::FlatText { text, fields } => {
            state.set_last_text(text.clone());
            for (key, value) in &fields {
                if let Ok(attr) = key.parse::<Attribute>() {
                    info!(attribute = %attr, value = %value, "attribute updated");
                    state.set(attr, value.clone());
                }
            }

            let overrides = TEXT_OVERRIDES.into_iter().filter_map(|attr| {
                let value = fields
                    .get(attr.as_str())
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| state.get(attr));
                (!value.is_null()).then(|| (attr, text_of(&value)))
            });
            let cmd = DeviceCommand::send_text_with(text, overrides);
            debug!(params = ?cmd.params, "text command built");
            vec![cmd]
        }
        SetPayload::Ignored => {
            debug!("command payload matches no dialect; ignored");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(payload: &str, state: &mut StateStore) -> Vec<DeviceCommand> {
        translate(&TopicKey::Set, payload.as_bytes(), state)
    }

    fn named(key: &str, payload: &str, state: &mut StateStore) -> Vec<DeviceCommand> {
        translate(&TopicKey::named(key), payload.as_bytes(), state)
    }

    #[test]
    fn parse_distinguishes_dialects() {
        assert_eq!(
            SetPayload::parse(r#"{"command":"led_on","params":[]}"#),
            SetPayload::Structured(DeviceCommand::led_on())
        );
        assert!(matches!(
            SetPayload::parse(r#"{"send_text":"Hi","color":"ff0000"}"#),
            SetPayload::FlatText { ref text, .. } if text == "Hi"
        ));
        assert_eq!(SetPayload::parse("plain text"), SetPayload::Ignored);
        assert_eq!(SetPayload::parse("[1,2]"), SetPayload::Ignored);
        assert_eq!(SetPayload::parse(r#"{"color":"ff0000"}"#), SetPayload::Ignored);
        assert_eq!(SetPayload::parse(r#"{"command":5,"params":[]}"#), SetPayload::Ignored);
    }

    #[test]
    fn structured_and_flat_text_are_equivalent() {
        let mut structured_state = StateStore::new();
        let structured = set(
            r#"{"command":"send_text","params":["text=Hello","color=ff0000"]}"#,
            &mut structured_state,
        );

        let mut flat_state = StateStore::new();
        let flat = set(r#"{"send_text":"Hello","color":"ff0000"}"#, &mut flat_state);

        assert_eq!(structured_state.last_text(), "Hello");
        assert_eq!(flat_state.last_text(), "Hello");
        assert_eq!(structured.len(), 1);
        assert_eq!(flat.len(), 1);
        assert_eq!(structured[0].text(), Some("Hello"));
        assert_eq!(flat[0].params[0], "Hello");
        // Structured commands go out verbatim, so the device still sees the
        // `text=` prefix it was given. Only the recorded text is normalized.
        assert_eq!(structured[0].params[0], "text=Hello");
    }

    #[test]
    fn structured_command_is_forwarded_verbatim() {
        let mut state = StateStore::new();
        let payload = r#"{"command":"send_text","params":["text=Hello","color=ff0000"]}"#;
        let cmds = set(payload, &mut state);
        assert_eq!(
            cmds,
            vec![DeviceCommand::new(
                "send_text",
                vec!["text=Hello".into(), "color=ff0000".into()]
            )]
        );
        // Structured commands do not touch attributes.
        assert_eq!(state.get(Attribute::Color), json!("ffffff"));
    }

    #[test]
    fn led_on_and_off_are_forwarded() {
        let mut state = StateStore::new();
        let on = set(r#"{"command":"led_on","params":[]}"#, &mut state);
        assert_eq!(on, vec![DeviceCommand::led_on()]);
        let off = set(r#"{"command":"led_off","params":[]}"#, &mut state);
        assert_eq!(off, vec![DeviceCommand::led_off()]);
        assert_eq!(state.last_text(), "");
    }

    #[test]
    fn structured_send_text_without_params_keeps_last_text() {
        let mut state = StateStore::new();
        state.set_last_text("previous");
        let cmds = set(r#"{"command":"send_text","params":[]}"#, &mut state);
        assert_eq!(cmds.len(), 1);
        assert_eq!(state.last_text(), "previous");
    }

    #[test]
    fn flat_text_merges_attributes_and_falls_back_to_state() {
        let mut state = StateStore::new();
        state.set(Attribute::Font, json!("VCR_OSD_MONO"));
        let cmds = set(
            r#"{"send_text":"Hi","color":"ff0000","speed":50,"brightness":30,"bogus":1}"#,
            &mut state,
        );

        assert_eq!(state.get(Attribute::Color), json!("ff0000"));
        assert_eq!(state.get(Attribute::Speed), json!(50));
        assert_eq!(state.get(Attribute::Brightness), json!(30));
        assert_eq!(
            cmds,
            vec![DeviceCommand::new(
                "send_text",
                vec![
                    "Hi".into(),
                    "color=ff0000".into(),
                    "speed=50".into(),
                    "animation=1".into(),
                    "font=VCR_OSD_MONO".into(),
                    "matrix_height=16".into(),
                ]
            )]
        );
    }

    #[test]
    fn flat_text_skips_null_overrides() {
        let mut state = StateStore::new();
        state.set(Attribute::Font, Value::Null);
        state.set(Attribute::MatrixHeight, Value::Null);
        let cmds = set(r#"{"send_text":"Hi","font":null}"#, &mut state);
        assert!(cmds[0].params.contains(&"color=ffffff".to_string()));
        assert!(cmds[0].params.iter().all(|p| !p.starts_with("font=")));
        assert!(cmds[0].params.iter().all(|p| !p.starts_with("matrix_height=")));
    }

    #[test]
    fn direct_text_sent_only_when_powered() {
        let mut state = StateStore::new();
        assert!(named("send_text", "Hello", &mut state).is_empty());
        assert_eq!(state.last_text(), "Hello");

        state.set(Attribute::Power, json!(true));
        assert_eq!(
            named("send_text", "World", &mut state),
            vec![DeviceCommand::send_text("World")]
        );
        assert_eq!(state.last_text(), "World");
    }

    #[test]
    fn flat_power_string_enables_direct_text() {
        let mut state = StateStore::new();
        set(r#"{"send_text":"x","power":"ON"}"#, &mut state);
        assert_eq!(state.get(Attribute::Power), json!("ON"));
        assert_eq!(
            named("send_text", "Hello", &mut state),
            vec![DeviceCommand::send_text("Hello")]
        );
    }

    #[test]
    fn direct_text_json_string_is_unquoted() {
        let mut state = StateStore::new();
        named("send_text", "\"quoted\"", &mut state);
        assert_eq!(state.last_text(), "quoted");
        named("send_text", "42", &mut state);
        assert_eq!(state.last_text(), "42");
    }

    #[test]
    fn power_tokens_normalize() {
        for token in ["on", "ON", "1", "true", "TRUE", "True", "\"ON\""] {
            assert!(parse_power(token), "{token} must be on");
        }
        for token in ["off", "OFF", "0", "false", "yes", "", "2", "1.0", "null", " on "] {
            assert!(!parse_power(token), "{token} must be off");
        }
    }

    #[test]
    fn power_on_sends_blank_text() {
        let mut state = StateStore::new();
        assert_eq!(named("power", "ON", &mut state), vec![DeviceCommand::send_text(" ")]);
        assert_eq!(state.get(Attribute::Power), json!(true));
    }

    #[test]
    fn power_off_sends_exactly_one_clear() {
        let mut state = StateStore::new();
        state.set(Attribute::Power, json!(true));
        assert_eq!(named("power", "OFF", &mut state), vec![DeviceCommand::clear()]);
        assert_eq!(state.get(Attribute::Power), json!(false));
    }

    #[test]
    fn attributes_store_json_or_raw_without_sending() {
        let mut state = StateStore::new();
        assert!(named("brightness", "55", &mut state).is_empty());
        assert_eq!(state.get(Attribute::Brightness), json!(55));

        assert!(named("color", "00ff00", &mut state).is_empty());
        assert_eq!(state.get(Attribute::Color), json!("00ff00"));

        assert!(named("font_size", "null", &mut state).is_empty());
        assert_eq!(state.get(Attribute::FontSize), Value::Null);
    }

    #[test]
    fn clear_key_sends_clear_without_state_change() {
        let mut state = StateStore::new();
        let before = state.clone();
        assert_eq!(named("clear", "", &mut state), vec![DeviceCommand::clear()]);
        assert_eq!(state, before);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut state = StateStore::new();
        let before = state.clone();
        assert!(named("volume", "11", &mut state).is_empty());
        assert!(set("not json", &mut state).is_empty());
        assert_eq!(state, before);
    }
}
