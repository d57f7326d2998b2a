//! Rendering of summary/description templates over a normalized view of an
//! event.

use chrono::Local;
use serde_json::{Map, Value};

use crate::error::RenderError;
use crate::event::Event;

/// Where the events come from; feeds `$Instance`, `$ServerUri` and
/// `$EventUri`.
#[derive(Clone, Debug, Default)]
pub struct HostInfo {
    pub server_url: Option<String>,
    pub instance: Option<String>,
}

impl HostInfo {
    /// Server URL with exactly one trailing slash.
    #[must_use]
    pub fn base_uri(&self) -> Option<String> {
        self.server_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| format!("{}/", url.trim_end_matches('/')))
    }

    #[must_use]
    pub fn event_uri(&self, event_id: &str) -> Option<String> {
        self.base_uri().map(|base| {
            format!("{base}#/events?filter=@Id%20%3D%20'{event_id}'&show=expanded")
        })
    }
}

/// Template context: reserved `$` keys plus every event property, properties
/// winning over reserved keys of the same name.
#[derive(Clone, Debug, PartialEq)]
pub struct EventView(Map<String, Value>);

impl EventView {
    #[must_use]
    pub fn new(event: &Event, host: &HostInfo) -> Self {
        let properties = event.properties.to_json_map();
        let optional = |value: Option<String>| value.map_or(Value::Null, Value::String);

        let mut map = Map::new();
        map.insert("$Id".into(), Value::String(event.id.clone()));
        map.insert(
            "$UtcTimestamp".into(),
            Value::String(event.timestamp.to_rfc3339()),
        );
        map.insert(
            "$LocalTimestamp".into(),
            Value::String(event.timestamp.with_timezone(&Local).to_rfc3339()),
        );
        map.insert("$Level".into(), Value::String(event.level.to_string()));
        map.insert(
            "$MessageTemplate".into(),
            optional(event.message_template.clone()),
        );
        map.insert(
            "$Message".into(),
            Value::String(event.rendered_message.clone()),
        );
        map.insert("$Exception".into(), optional(event.exception.clone()));
        map.insert("$Properties".into(), Value::Object(properties.clone()));
        map.insert(
            "$EventType".into(),
            optional(event.event_type.map(|t| format!("${t:08X}"))),
        );
        map.insert("$Instance".into(), optional(host.instance.clone()));
        map.insert("$ServerUri".into(), optional(host.base_uri()));
        map.insert("$EventUri".into(), optional(host.event_uri(&event.id)));

        for (key, value) in properties {
            map.insert(key, value);
        }
        Self(map)
    }

    /// Look up a possibly dotted path such as `$Properties.User`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Template rendering capability.
pub trait TemplateRenderer: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`RenderError`] when the template is malformed.
    fn render(&self, template: &str, view: &EventView) -> Result<String, RenderError>;
}

/// Substitutes `{{Name}}` placeholders. Strings render bare, missing and
/// null values render empty, anything else renders as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, view: &EventView) -> Result<String, RenderError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let open = offset + start;
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(RenderError::Unterminated { offset: open })?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(RenderError::EmptyName { offset: open });
            }
            match view.get(name) {
                None | Some(Value::Null) => {}
                Some(Value::String(value)) => out.push_str(value),
                Some(other) => out.push_str(&other.to_string()),
            }
            let consumed = start + 2 + end + 2;
            rest = &rest[consumed..];
            offset += consumed;
        }
        out.push_str(rest);
        Ok(out)
    }
}
