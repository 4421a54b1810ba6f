// SPDX-License-Identifier: Apache-2.0

//! Declarative record schemas for messages.
//!
//! A schema is owned by the producing port; consumers declare a compatible
//! schema. Compatibility is structural (field-by-field) plus, when both sides
//! carry a version, a same-major / newer-minor version check.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A monotonic `major.minor.patch` schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
pub struct SchemaVersion {
    /// Incompatible changes.
    pub major: u32,
    /// Backward-compatible additions.
    pub minor: u32,
    /// Non-structural fixes.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns `true` if a producer at `self` can feed a consumer expecting
    /// `other`: same major, and the producer is at least as new.
    #[must_use]
    pub fn satisfies(&self, other: &SchemaVersion) -> bool {
        self.major == other.major && self >= other
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |label: &str| -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {label} component in version `{s}`"))?
                .parse::<u32>()
                .map_err(|e| format!("invalid {label} component in version `{s}`: {e}"))
        };
        let version = SchemaVersion::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(format!("too many components in version `{s}`"));
        }
        Ok(version)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The type of a schema field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float; integer values are accepted.
    Float,
    /// Boolean.
    Boolean,
    /// RFC 3339 timestamp carried as a string.
    Timestamp,
    /// Nested JSON object.
    Object,
    /// JSON array.
    Array,
    /// Any JSON value.
    #[default]
    Any,
}

impl FieldType {
    /// Returns `true` if the given JSON value inhabits this type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Timestamp => value.is_string(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    /// Returns `true` if a producer emitting `other` satisfies this type.
    #[must_use]
    pub fn accepts(&self, other: &FieldType) -> bool {
        match self {
            FieldType::Any => true,
            FieldType::Float => matches!(other, FieldType::Float | FieldType::Integer),
            _ => self == other,
        }
    }
}

/// Specification of a single schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// The field type.
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present on every message.
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    /// A required field of the given type.
    #[must_use]
    pub const fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
        }
    }

    /// An optional field of the given type.
    #[must_use]
    pub const fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
        }
    }
}

/// A declarative record schema with strict field checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    /// The schema name.
    pub name: String,
    /// Optional monotonic version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SchemaVersion>,
    /// Declared fields, keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

/// A schema violation detected while checking a message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// A required field is absent.
    #[error("schema `{schema}`: missing required field `{field}`")]
    MissingField {
        /// The schema name.
        schema: String,
        /// The missing field name.
        field: String,
    },

    /// A field value does not inhabit its declared type.
    #[error("schema `{schema}`: field `{field}` is not a {expected:?}")]
    TypeMismatch {
        /// The schema name.
        schema: String,
        /// The offending field name.
        field: String,
        /// The declared type.
        expected: FieldType,
    },

    /// Strict mode rejected a field that is not declared in the schema.
    #[error("schema `{schema}`: unknown field `{field}` rejected in strict mode")]
    UnknownField {
        /// The schema name.
        schema: String,
        /// The undeclared field name.
        field: String,
    },
}

impl Schema {
    /// Creates a schema accepting any record. Used where a port intentionally
    /// carries free-form payloads.
    #[must_use]
    pub fn any<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            version: None,
            fields: BTreeMap::new(),
        }
    }

    /// Creates a schema from `(field, spec)` pairs.
    #[must_use]
    pub fn record<S: Into<String>>(
        name: S,
        fields: impl IntoIterator<Item = (&'static str, FieldSpec)>,
    ) -> Self {
        Self {
            name: name.into(),
            version: None,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        }
    }

    /// Sets the schema version.
    #[must_use]
    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Checks a record against this schema.
    ///
    /// In strict mode, fields not declared in the schema are rejected. A
    /// schema with no declared fields accepts any record even in strict mode.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaViolation`] found, checking declared fields
    /// in lexicographic order.
    pub fn check(&self, record: &Map<String, Value>, strict: bool) -> Result<(), SchemaViolation> {
        if self.fields.is_empty() {
            return Ok(());
        }
        for (field, spec) in &self.fields {
            match record.get(field) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(SchemaViolation::MissingField {
                            schema: self.name.clone(),
                            field: field.clone(),
                        });
                    }
                }
                Some(value) => {
                    if !spec.field_type.matches(value) {
                        return Err(SchemaViolation::TypeMismatch {
                            schema: self.name.clone(),
                            field: field.clone(),
                            expected: spec.field_type,
                        });
                    }
                }
            }
        }
        if strict {
            for field in record.keys() {
                if !self.fields.contains_key(field) {
                    return Err(SchemaViolation::UnknownField {
                        schema: self.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks that a producer emitting `producer` can feed this (consumer)
    /// schema: every field the consumer requires must be declared by the
    /// producer with a compatible type, and versions, when both are present,
    /// must share a major with the producer at least as new.
    ///
    /// # Errors
    ///
    /// Returns a description of the first incompatibility found.
    pub fn accepts(&self, producer: &Schema) -> Result<(), String> {
        if let (Some(consumer_v), Some(producer_v)) = (&self.version, &producer.version) {
            if !producer_v.satisfies(consumer_v) {
                return Err(format!(
                    "producer version {producer_v} does not satisfy consumer version {consumer_v}"
                ));
            }
        }
        // A consumer with no declared fields is structurally universal.
        if self.fields.is_empty() {
            return Ok(());
        }
        // A producer with no declared fields promises nothing we can check
        // statically; compatibility is deferred to runtime validation.
        if producer.fields.is_empty() {
            return Ok(());
        }
        for (field, spec) in self.fields.iter().filter(|(_, s)| s.required) {
            match producer.fields.get(field) {
                None => {
                    return Err(format!(
                        "consumer requires field `{field}` which producer `{}` does not declare",
                        producer.name
                    ));
                }
                Some(produced) => {
                    if !spec.field_type.accepts(&produced.field_type) {
                        return Err(format!(
                            "field `{field}`: consumer expects {:?}, producer declares {:?}",
                            spec.field_type, produced.field_type
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
