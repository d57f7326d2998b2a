//! Structured log events as submitted by the monitored application.
//!
//! Events arrive as compact log event format (CLEF) JSON objects: reserved
//! `@`-prefixed keys carry the timestamp, level, message and exception, and
//! every other key is a structured property.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::Level;

/// A property value. Properties are heterogeneous, so every consumer matches
/// on the variant rather than downcasting.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<PropertyValue>),
    Object(Properties),
}

impl PropertyValue {
    /// The value as a plain string, if it is a scalar.
    #[must_use]
    pub fn as_scalar_string(&self) -> Option<String> {
        match self {
            Self::Null | Self::Array(_) | Self::Object(_) => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Number(value) => Some(value.to_string()),
            Self::String(value) => Some(value.clone()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::Number(value) => Value::Number(value.clone()),
            Self::String(value) => Value::String(value.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(props) => Value::Object(props.to_json_map()),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(value),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().collect()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl Display for PropertyValue {
    /// Strings render bare, everything else as JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Event properties in the order they were supplied. Keys are case-sensitive
/// but may be looked up case-insensitively through [`crate::resolve`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(Vec<(String, PropertyValue)>);

impl Properties {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Exact, case-sensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(key, value)| (key.to_string(), value.to_json()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (key, value) in iter {
            props.insert(key, value);
        }
        props
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message_template: Option<String>,
    pub rendered_message: String,
    pub exception: Option<String>,
    pub event_type: Option<u32>,
    pub properties: Properties,
}

impl Event {
    /// Text the fingerprint is computed from: the exception if there is one,
    /// otherwise the rendered message.
    #[must_use]
    pub fn fingerprint_source(&self) -> &str {
        match self.exception.as_deref() {
            Some(exception) if !exception.is_empty() => exception,
            _ => &self.rendered_message,
        }
    }

    /// Decode a single CLEF JSON line.
    ///
    /// # Errors
    ///
    /// Returns the decoding error when the line is not a JSON object or a
    /// reserved field has the wrong type or an unknown level.
    pub fn from_clef(line: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: RawClefEvent = serde_json::from_str(line)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
struct RawClefEvent {
    #[serde(rename = "@t")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "@l")]
    level: Option<String>,
    #[serde(rename = "@m")]
    message: Option<String>,
    #[serde(rename = "@mt")]
    message_template: Option<String>,
    #[serde(rename = "@x")]
    exception: Option<String>,
    #[serde(rename = "@i")]
    event_type: Option<RawEventType>,
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

/// `@i` is either a hex string or a plain number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEventType {
    Number(u64),
    Hex(String),
}

impl RawEventType {
    fn to_u32(&self) -> std::result::Result<u32, String> {
        match self {
            Self::Number(n) => {
                u32::try_from(*n).map_err(|_| format!("@i event type {n} does not fit in 32 bits"))
            }
            Self::Hex(hex) => u32::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|err| format!("invalid @i event type {hex:?}: {err}")),
        }
    }
}

/// Maps a non-reserved CLEF key to its property name: `@@Name` is an escaped
/// `@Name`, any other `@` key is reserved.
fn property_name(key: String) -> Option<String> {
    match key.strip_prefix("@@") {
        Some(rest) => Some(format!("@{rest}")),
        None if key.starts_with('@') => None,
        None => Some(key),
    }
}

impl TryFrom<RawClefEvent> for Event {
    type Error = String;

    fn try_from(raw: RawClefEvent) -> std::result::Result<Self, String> {
        let level = match raw.level.as_deref() {
            Some(level) => level.parse::<Level>()?,
            None => Level::Information,
        };
        let event_type = raw.event_type.as_ref().map(RawEventType::to_u32).transpose()?;
        let properties: Properties = raw
            .additional
            .into_iter()
            .filter_map(|(key, value)| property_name(key).map(|name| (name, value)))
            .collect();
        let rendered_message = match (raw.message, raw.message_template.as_deref()) {
            (Some(message), _) => message,
            (None, Some(template)) => render_message_template(template, &properties),
            (None, None) => String::new(),
        };
        Ok(Self {
            id: raw.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            level,
            message_template: raw.message_template,
            rendered_message,
            exception: raw.exception,
            event_type,
            properties,
        })
    }
}

/// Substitute `{Name}` holes of a message template with property values.
/// `{{` and `}}` are literal braces; holes naming unknown properties are kept
/// verbatim.
fn render_message_template(template: &str, properties: &Properties) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let hole = &tail[1..end];
        let name = hole
            .trim_start_matches(['@', '$'])
            .split([':', ','])
            .next()
            .unwrap_or_default();
        match properties.get(name) {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}
