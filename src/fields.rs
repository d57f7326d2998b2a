//! Assembly of the ticket field set from an event, the static field settings
//! and the per-event property overrides.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::RenderError;
use crate::event::Event;
use crate::expr::{AbsoluteDate, DurationExpr};
use crate::fingerprint::Fingerprint;
use crate::priority::PriorityMapper;
use crate::resolve::{lookup, resolve, resolve_field};
use crate::tags::{TagSet, compute_tags};
use crate::template::{EventView, HostInfo, TemplateRenderer};

const SUMMARY_MAX_CHARS: usize = 255;
const DESCRIPTION_EXCERPT_CHARS: usize = 512;
const PROPERTIES_COMMENT_TITLE: &str = "Structured Event Properties";

/// Static field configuration. Every `*_property` names an event property
/// that, when present and non-empty, overrides the static value next to it.
#[derive(Clone, Debug, Default)]
pub struct FieldSettings {
    pub project_key: String,
    pub project_property: Option<String>,
    pub issue_type: String,
    pub reporter: String,
    pub assignee: Option<String>,
    pub assignee_property: Option<String>,
    pub original_estimate: Option<String>,
    pub original_estimate_property: Option<String>,
    pub remaining_estimate: Option<String>,
    pub remaining_estimate_property: Option<String>,
    pub due_date: Option<String>,
    pub due_date_property: Option<String>,
    pub components: Vec<String>,
    pub labels: TagSet,
    pub level_as_label: bool,
    pub dynamic_tags: bool,
    pub tags_property: Option<String>,
    pub title_properties: Vec<String>,
    pub summary_template: Option<String>,
    pub description_template: Option<String>,
    pub fingerprint_field: Option<u32>,
    pub full_details_in_description: bool,
}

/// Ticket fields keyed by tracker field name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldSet(Map<String, Value>);

impl FieldSet {
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[must_use]
pub fn fingerprint_field_name(field: u32) -> String {
    format!("customfield_{field}")
}

pub struct FieldAssembler {
    settings: FieldSettings,
    priority: PriorityMapper,
    renderer: Arc<dyn TemplateRenderer>,
    host: HostInfo,
}

impl FieldAssembler {
    #[must_use]
    pub fn new(
        settings: FieldSettings,
        priority: PriorityMapper,
        renderer: Arc<dyn TemplateRenderer>,
        host: HostInfo,
    ) -> Self {
        Self {
            settings,
            priority,
            renderer,
            host,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &FieldSettings {
        &self.settings
    }

    /// Project the ticket for `event` lands in: the project property when
    /// set, otherwise the configured key. Duplicate searches use it too.
    #[must_use]
    pub fn project_key(&self, event: &Event) -> String {
        let settings = &self.settings;
        resolve_field(
            &event.properties,
            settings.project_property.as_deref(),
            Some(settings.project_key.as_str()),
        )
        .map_or_else(|| settings.project_key.trim().to_string(), |r| r.value.trim().to_string())
    }

    /// Assemble the fields for `event`. `today` anchors relative due dates.
    ///
    /// # Errors
    ///
    /// Fails only when a configured summary or description template cannot
    /// be rendered.
    pub fn assemble(
        &self,
        event: &Event,
        fingerprint: &Fingerprint,
        today: NaiveDate,
    ) -> Result<FieldSet, RenderError> {
        let settings = &self.settings;
        let props = &event.properties;
        let view = EventView::new(event, &self.host);
        let mut fields = FieldSet::default();

        fields.insert("project", json!({ "key": self.project_key(event) }));
        fields.insert("issuetype", json!({ "name": settings.issue_type.trim() }));
        fields.insert("summary", Value::String(self.summary(event, &view)?));
        fields.insert("description", Value::String(self.description(event, &view)?));
        fields.insert(
            "priority",
            json!({ "name": self.priority.priority_for(event).as_str() }),
        );

        if let Some(assignee) = resolve_field(
            props,
            settings.assignee_property.as_deref(),
            settings.assignee.as_deref(),
        ) {
            fields.insert("assignee", json!({ "name": assignee.value.trim() }));
        }

        let components: Vec<Value> = settings
            .components
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|name| json!({ "name": name }))
            .collect();
        if !components.is_empty() {
            fields.insert("components", Value::Array(components));
        }

        let mut labels = settings.labels.clone();
        if settings.level_as_label {
            labels.insert(event.level.as_str());
        }
        let tags = compute_tags(
            &labels,
            settings.dynamic_tags,
            lookup(props, settings.tags_property.as_deref()),
        );
        if !tags.is_empty() {
            fields.insert("labels", json!(tags.into_vec()));
        }

        let mut timetracking = Map::new();
        for (key, default, property) in [
            (
                "originalEstimate",
                &settings.original_estimate,
                &settings.original_estimate_property,
            ),
            (
                "remainingEstimate",
                &settings.remaining_estimate,
                &settings.remaining_estimate_property,
            ),
        ] {
            let Some(resolved) = resolve_field(props, property.as_deref(), default.as_deref())
            else {
                continue;
            };
            match DurationExpr::parse(&resolved.value) {
                Some(expr) => {
                    timetracking.insert(key.to_string(), Value::String(estimate_string(expr)));
                }
                None => debug!(event_id = %event.id, field = key, value = %resolved.value, "dropping estimate that is not a duration"),
            }
        }
        if !timetracking.is_empty() {
            fields.insert("timetracking", Value::Object(timetracking));
        }

        if let Some(resolved) = resolve_field(
            props,
            settings.due_date_property.as_deref(),
            settings.due_date.as_deref(),
        ) {
            match resolve_due_date(&resolved.value, today) {
                Some(date) => fields.insert("duedate", Value::String(date)),
                None => debug!(event_id = %event.id, value = %resolved.value, "dropping unparseable due date"),
            }
        }

        if let Some(field) = settings.fingerprint_field {
            fields.insert(
                fingerprint_field_name(field),
                Value::String(fingerprint.to_string()),
            );
        }

        Ok(fields)
    }

    fn summary(&self, event: &Event, view: &EventView) -> Result<String, RenderError> {
        let base = match self.settings.summary_template.as_deref() {
            Some(template) => self.renderer.render(template, view)?,
            None => truncate_with_ellipsis(&clean_crlf(&event.rendered_message), SUMMARY_MAX_CHARS),
        };
        let prefix = self
            .settings
            .title_properties
            .iter()
            .filter_map(|name| resolve(&event.properties, Some(name.as_str())))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        if prefix.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{prefix} : {base}"))
        }
    }

    fn description(&self, event: &Event, view: &EventView) -> Result<String, RenderError> {
        if let Some(template) = self.settings.description_template.as_deref() {
            return self.renderer.render(template, view);
        }
        let mut out = String::new();
        out.push_str("{noformat}\n");
        out.push_str(&format!("Reporter Account Name: {}\n", self.settings.reporter));
        out.push_str(&format!("Event Id: {}\n", event.id));
        out.push_str(&format!("Level : {}\n", event.level));
        if let Some(exception) = event.exception.as_deref().filter(|e| !e.is_empty()) {
            out.push_str(&format!("Exception Message: {exception}\n"));
        }
        out.push_str(&format!(
            "Timestamp : {}\n",
            event.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
        if let Some(uri) = self.host.event_uri(&event.id) {
            out.push_str(&format!("Event Url : {uri}\n"));
        }
        out.push_str("{noformat}\n{noformat}\n");
        if self.settings.full_details_in_description {
            out.push_str(&event.rendered_message);
        } else {
            out.push_str(&truncate_with_ellipsis(
                &event.rendered_message,
                DESCRIPTION_EXCERPT_CHARS,
            ));
        }
        out.push_str("\n{noformat}\n");
        Ok(out)
    }
}

/// Body of the follow-up comment carrying the full rendered message.
#[must_use]
pub fn details_comment(event: &Event) -> Option<String> {
    (!event.rendered_message.is_empty())
        .then(|| format!("{{noformat}}{}{{noformat}}", event.rendered_message))
}

/// Body of the follow-up comment listing every structured property.
#[must_use]
pub fn properties_comment(event: &Event) -> Option<String> {
    if event.properties.is_empty() {
        return None;
    }
    let mut out = format!("h3.{PROPERTIES_COMMENT_TITLE}\n{{noformat}}\n");
    for (name, value) in event.properties.iter() {
        out.push_str(&format!("{name}: {}\n", value.to_json()));
    }
    out.push_str("{noformat}\n");
    Some(out)
}

/// An absolute date is used verbatim, a duration is counted from the start of
/// `today`; anything else yields `None`.
#[must_use]
pub fn resolve_due_date(value: &str, today: NaiveDate) -> Option<String> {
    if let Some(date) = AbsoluteDate::parse(value) {
        return Some(date.to_string());
    }
    let expr = DurationExpr::parse(value)?;
    let due = expr.evaluate(today.and_hms_opt(0, 0, 0)?)?;
    Some(due.date().format("%Y-%m-%d").to_string())
}

fn estimate_string(expr: DurationExpr) -> String {
    if expr.is_zero() {
        "0m".to_string()
    } else {
        expr.to_string()
    }
}

fn clean_crlf(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
