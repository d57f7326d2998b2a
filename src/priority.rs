//! Event to ticket priority mapping.
//!
//! The `priority` setting is either a single priority name applied to every
//! event, or a `key=Priority,key=Priority` table keyed by the event level (or
//! by the value of a chosen property). Tables are parsed all-or-nothing.

use std::collections::HashMap;

use tracing::warn;

use crate::error::ConfigError;
use crate::event::Event;
use crate::resolve::{fold_case, resolve};
use crate::types::Priority;

/// Property name that stands for the event level itself.
pub const LEVEL_SOURCE: &str = "$Level";

const FIELD: &str = "fields.priority";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PrioritySource {
    Level,
    Property(String),
}

impl PrioritySource {
    #[must_use]
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting.map(str::trim).filter(|s| !s.is_empty()) {
            None => Self::Level,
            Some(name) if [LEVEL_SOURCE, "@Level"].map(fold_case).contains(&fold_case(name)) => {
                Self::Level
            }
            Some(name) => Self::Property(name.to_string()),
        }
    }
}

/// Lower-cased key to priority.
pub type PriorityTable = HashMap<String, Priority>;

/// Parse a `key=Priority,...` table. Empty segments are skipped; any other
/// malformed pair rejects the whole table.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending pair.
pub fn parse_mapping(raw: &str) -> std::result::Result<PriorityTable, ConfigError> {
    let mut table = PriorityTable::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parts: Vec<&str> = pair.split('=').map(str::trim).collect();
        let [key, value] = parts.as_slice() else {
            return Err(invalid(format!("expected key=Priority, got {pair:?}")));
        };
        if key.is_empty() {
            return Err(invalid(format!("empty key in {pair:?}")));
        }
        let priority = value
            .parse::<Priority>()
            .map_err(|err| invalid(format!("{err} in {pair:?}")))?;
        table.insert(fold_case(key), priority);
    }
    if table.is_empty() {
        return Err(invalid("mapping contains no entries".to_string()));
    }
    Ok(table)
}

fn invalid(message: String) -> ConfigError {
    ConfigError::InvalidField {
        field: FIELD,
        message,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PriorityMapper {
    Single(Priority),
    Mapping {
        table: PriorityTable,
        source: PrioritySource,
        default: Priority,
    },
}

impl PriorityMapper {
    /// Build the mapper once from configuration. A bad mapping or priority
    /// name is logged and replaced by the single default priority so that
    /// notification delivery is never blocked on configuration.
    #[must_use]
    pub fn install(setting: Option<&str>, source: Option<&str>, default: Priority) -> Self {
        let Some(setting) = setting.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Single(default);
        };
        if setting.contains('=') {
            return match parse_mapping(setting) {
                Ok(table) => Self::Mapping {
                    table,
                    source: PrioritySource::from_setting(source),
                    default,
                },
                Err(err) => {
                    warn!(error = %err, %default, "priority mapping rejected; using default priority for every event");
                    Self::Single(default)
                }
            };
        }
        match setting.parse::<Priority>() {
            Ok(priority) => Self::Single(priority),
            Err(err) => {
                warn!(error = %err, %default, "priority rejected; using default priority");
                Self::Single(default)
            }
        }
    }

    #[must_use]
    pub fn priority_for(&self, event: &Event) -> Priority {
        match self {
            Self::Single(priority) => *priority,
            Self::Mapping {
                table,
                source,
                default,
            } => {
                let key = match source {
                    PrioritySource::Level => Some(fold_case(event.level.as_str())),
                    PrioritySource::Property(name) => resolve(&event.properties, Some(name))
                        .and_then(|value| value.as_scalar_string())
                        .map(|value| fold_case(value.trim())),
                };
                key.and_then(|key| table.get(&key).copied())
                    .unwrap_or(*default)
            }
        }
    }
}
