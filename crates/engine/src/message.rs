// SPDX-License-Identifier: Apache-2.0

//! Message definitions for the component runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable, schema-validated value object flowing through the pipeline.
///
/// A message is a flat record of named JSON values, optionally stamped with a
/// timezone-aware `event_time` used for message-age observations. Messages are
/// cloned, never mutated: deriving a new message goes through
/// [`Message::map_fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_time: Option<DateTime<Utc>>,
}

impl Message {
    /// Creates a message from a field map.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            event_time: None,
        }
    }

    /// Creates a message from a JSON value, which must be an object.
    ///
    /// Returns `None` for non-object values.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::new(fields)),
            _ => None,
        }
    }

    /// Stamps the message with an event time.
    #[must_use]
    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// The message fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Looks up one field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The event time, when the producer stamped one.
    #[must_use]
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    /// Age of the message relative to `now`, in milliseconds, when an event
    /// time is present. Clamped at zero for clock skew.
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> Option<f64> {
        self.event_time.map(|t| {
            let ms = (now - t).num_milliseconds();
            if ms < 0 { 0.0 } else { ms as f64 }
        })
    }

    /// Derives a new message by transforming the field map. The event time is
    /// carried over.
    #[must_use]
    pub fn map_fields<F>(&self, f: F) -> Self
    where
        F: FnOnce(Map<String, Value>) -> Map<String, Value>,
    {
        Self {
            fields: f(self.fields.clone()),
            event_time: self.event_time,
        }
    }

    /// Converts the message back into a JSON object value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn msg(value: Value) -> Message {
        Message::from_value(value).expect("object")
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Message::from_value(json!([1, 2])).is_none());
        assert!(Message::from_value(json!("str")).is_none());
        assert!(Message::from_value(json!({"a": 1})).is_some());
    }

    #[test]
    fn age_requires_event_time() {
        let now = Utc::now();
        let plain = msg(json!({"a": 1}));
        assert!(plain.age_ms(now).is_none());

        let stamped = plain.with_event_time(now - TimeDelta::milliseconds(250));
        let age = stamped.age_ms(now).expect("age");
        assert!((age - 250.0).abs() < 1.0);

        // Future event times clamp to zero rather than going negative.
        let future = msg(json!({})).with_event_time(now + TimeDelta::seconds(5));
        assert_eq!(future.age_ms(now), Some(0.0));
    }

    #[test]
    fn serde_round_trip_is_lossless() {
        let now = Utc::now();
        let original = msg(json!({
            "id": 7,
            "nested": { "a": [1, 2, 3] },
            "flag": true
        }))
        .with_event_time(now);

        let encoded = serde_json::to_string(&original).expect("encodes");
        let decoded: Message = serde_json::from_str(&encoded).expect("decodes");
        assert_eq!(decoded, original);
    }

    #[test]
    fn map_fields_preserves_event_time() {
        let now = Utc::now();
        let original = msg(json!({"n": 1})).with_event_time(now);
        let derived = original.map_fields(|mut fields| {
            let _ = fields.insert("n".to_owned(), json!(2));
            fields
        });
        assert_eq!(derived.get("n"), Some(&json!(2)));
        assert_eq!(derived.event_time(), Some(now));
        // The original is untouched.
        assert_eq!(original.get("n"), Some(&json!(1)));
    }
}
