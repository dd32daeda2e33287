//! [`StateStore`] – canonical device state.
//!
//! Always fully populated: every [`Attribute`] has a value from the start and
//! the key set never changes.  Values are stored as given; range and type
//! checks are the caller's business.

use std::collections::BTreeMap;

use ipixel_types::Attribute;
use serde_json::{Map, Value};

/// Attribute values plus the most recently displayed text.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStore {
    values: BTreeMap<Attribute, Value>,
    last_text: String,
}

/// A point-in-time copy of the [`StateStore`], taken for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub values: BTreeMap<Attribute, Value>,
    pub last_text: String,
}

impl StateStore {
    /// A store holding every attribute's default and an empty last text.
    pub fn new() -> Self {
        Self {
            values: Attribute::ALL
                .into_iter()
                .map(|a| (a, a.default_value()))
                .collect(),
            last_text: String::new(),
        }
    }

    pub fn get(&self, attr: Attribute) -> Value {
        self.values
            .get(&attr)
            .cloned()
            .unwrap_or_else(|| attr.default_value())
    }

    pub fn set(&mut self, attr: Attribute, value: Value) {
        self.values.insert(attr, value);
    }

    /// Whether the display is switched on.
    ///
    /// `power` may hold whatever a flat command stored, so any truthy value
    /// counts: `true`, a non-zero number, a non-empty string or container.
    pub fn is_powered(&self) -> bool {
        self.values.get(&Attribute::Power).is_some_and(is_truthy)
    }

    /// Copy of every attribute value.
    pub fn get_all(&self) -> BTreeMap<Attribute, Value> {
        self.values.clone()
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    pub fn set_last_text(&mut self, text: impl Into<String>) {
        self.last_text = text.into();
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: self.get_all(),
            last_text: self.last_text.clone(),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSnapshot {
    /// The aggregate state document, keyed by attribute name.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(attr, v)| (attr.as_str().to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Render one attribute value for its `<attr>/state` topic.
///
/// Matches what existing dashboards already parse: `True`/`False` for
/// booleans, `None` for null, strings unquoted, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_store_is_fully_populated_with_defaults() {
        let store = StateStore::new();
        let all = store.get_all();
        assert_eq!(all.len(), Attribute::ALL.len());
        for attr in Attribute::ALL {
            assert_eq!(all[&attr], attr.default_value());
        }
        assert_eq!(store.last_text(), "");
        assert!(!store.is_powered());
    }

    #[test]
    fn set_changes_only_that_attribute() {
        let mut store = StateStore::new();
        let before = store.get_all();
        store.set(Attribute::Brightness, json!(42));

        let after = store.get_all();
        assert_eq!(after[&Attribute::Brightness], json!(42));
        for attr in Attribute::ALL.into_iter().filter(|a| *a != Attribute::Brightness) {
            assert_eq!(after[&attr], before[&attr], "{attr} changed");
        }
    }

    #[test]
    fn invalid_values_are_stored_as_is() {
        let mut store = StateStore::new();
        store.set(Attribute::Brightness, json!("very bright"));
        assert_eq!(store.get(Attribute::Brightness), json!("very bright"));
    }

    #[test]
    fn get_all_is_a_copy() {
        let mut store = StateStore::new();
        let snapshot = store.get_all();
        store.set(Attribute::Color, json!("00ff00"));
        assert_eq!(snapshot[&Attribute::Color], json!("ffffff"));
    }

    #[test]
    fn power_follows_truthiness() {
        let mut store = StateStore::new();
        for on in [json!(true), json!("ON"), json!(1), json!(0.5)] {
            store.set(Attribute::Power, on.clone());
            assert!(store.is_powered(), "{on} must count as on");
        }
        for off in [json!(false), json!(""), json!(0), Value::Null, json!([])] {
            store.set(Attribute::Power, off.clone());
            assert!(!store.is_powered(), "{off} must count as off");
        }
    }

    #[test]
    fn aggregate_json_has_every_attribute() {
        let mut store = StateStore::new();
        store.set_last_text("hello");
        let doc = store.snapshot().to_json();
        let obj = doc.as_object().unwrap();
        assert_eq!(obj.len(), 10);
        assert_eq!(obj["power"], json!(false));
        assert_eq!(obj["font"], json!("gnufont"));
        assert_eq!(obj["font_size"], Value::Null);
        assert!(!obj.contains_key("last_text"));
    }

    #[test]
    fn render_matches_legacy_state_payloads() {
        assert_eq!(render_value(&json!(true)), "True");
        assert_eq!(render_value(&json!(false)), "False");
        assert_eq!(render_value(&Value::Null), "None");
        assert_eq!(render_value(&json!(80)), "80");
        assert_eq!(render_value(&json!("ffffff")), "ffffff");
        assert_eq!(render_value(&json!(1.5)), "1.5");
    }
}
