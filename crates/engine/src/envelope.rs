// SPDX-License-Identifier: Apache-2.0

//! Standard error envelope.
//!
//! Every item-level failure is reported as a structured, size-capped,
//! PII-redacted envelope. In v1 envelopes are emitted on the structured log;
//! the `err_dlq` port is reserved for v2.

use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::{ComponentId, PortName};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use uuid::Uuid;

/// Maximum size of the payload preview carried by an envelope.
pub const PAYLOAD_PREVIEW_CAP: usize = 64 * 1024;

static PII_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(?i)(ssn|credit_card|password|token|secret)").expect("static regex compiles")
});

/// A structured error record emitted when an item fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Unique id of this error occurrence.
    pub error_id: String,
    /// When the error was captured.
    pub ts: DateTime<Utc>,
    /// The component where the error occurred.
    pub component: ComponentId,
    /// The port involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortName>,
    /// Stable error code (the error variant name).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Redacted, size-capped preview of the offending payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_preview: Option<String>,
    /// The underlying cause, when distinct from the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Whether a later retry of the same item may succeed.
    pub retryable: bool,
}

impl ErrorEnvelope {
    /// Builds an envelope from a runtime error and the offending payload.
    #[must_use]
    pub fn from_error(
        component: &ComponentId,
        port: Option<&PortName>,
        error: &Error,
        payload: Option<&Message>,
    ) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            component: component.clone(),
            port: port.cloned(),
            code: error.variant_name().to_owned(),
            message: error.to_string(),
            payload_preview: payload.map(payload_preview),
            cause: None,
            retryable: error.is_retryable(),
        }
    }

    /// Emits the envelope on the structured log. This is the v1 error path;
    /// routing to an `err_dlq` port is reserved for v2.
    pub fn emit(&self) {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| self.message.clone());
        tracing::error!(
            component = %self.component,
            code = %self.code,
            error_id = %self.error_id,
            retryable = self.retryable,
            envelope = %payload,
            "item failed"
        );
    }
}

/// Renders a redacted, size-capped preview of a message payload.
#[must_use]
pub fn payload_preview(message: &Message) -> String {
    let redacted = Value::Object(redact_fields(message.fields()));
    let mut preview = redacted.to_string();
    if preview.len() > PAYLOAD_PREVIEW_CAP {
        // Truncate on a char boundary below the cap.
        let mut cut = PAYLOAD_PREVIEW_CAP;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
        preview.push_str("...(truncated)");
    }
    preview
}

/// Replaces the values of PII-named fields (`ssn`, `credit_card`, `password`,
/// `token`, `secret`, case-insensitive, substring match) with a marker,
/// recursing into nested objects.
#[must_use]
pub fn redact_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in fields {
        let redacted = if PII_FIELD.is_match(name) {
            Value::String("[REDACTED]".to_owned())
        } else if let Value::Object(nested) = value {
            Value::Object(redact_fields(nested))
        } else {
            value.clone()
        };
        let _ = out.insert(name.clone(), redacted);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_pii_field_names() {
        let msg = Message::from_value(json!({
            "id": 7,
            "Password": "hunter2",
            "api_token": "abc",
            "nested": {"credit_card_number": "4111", "ok": true}
        }))
        .unwrap();

        let preview = payload_preview(&msg);
        assert!(!preview.contains("hunter2"));
        assert!(!preview.contains("4111"));
        assert!(preview.contains("[REDACTED]"));
        assert!(preview.contains("\"id\":7"));
        assert!(preview.contains("\"ok\":true"));
    }

    #[test]
    fn caps_preview_size() {
        let big = "x".repeat(PAYLOAD_PREVIEW_CAP * 2);
        let msg = Message::from_value(json!({ "blob": big })).unwrap();
        let preview = payload_preview(&msg);
        assert!(preview.len() <= PAYLOAD_PREVIEW_CAP + "...(truncated)".len());
        assert!(preview.ends_with("...(truncated)"));
    }

    #[test]
    fn envelope_carries_code_and_retryability() {
        let err = Error::Transient {
            component: "store".into(),
            error: "connection reset".to_owned(),
        };
        let envelope = ErrorEnvelope::from_error(&"store".into(), None, &err, None);
        assert_eq!(envelope.code, "Transient");
        assert!(envelope.retryable);

        let err = Error::DropForbidden {
            component: "store".into(),
        };
        let envelope = ErrorEnvelope::from_error(&"store".into(), None, &err, None);
        assert_eq!(envelope.code, "DropForbidden");
        assert!(!envelope.retryable);
    }
}
