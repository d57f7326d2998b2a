use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::Step;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to read events from {origin}")]
    Input {
        origin: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("missing required configuration field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid configuration for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
    #[error("configuration error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to build HTTP client")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status {status}; body: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid JSON payload: {message}")]
    Json { message: String },
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("invalid tracker URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("tracker rejected the ticket: {}", format_field_errors(.errors))]
    Validation { errors: BTreeMap<String, String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unterminated placeholder starting at byte {offset}")]
    Unterminated { offset: usize },
    #[error("empty placeholder at byte {offset}")]
    EmptyName { offset: usize },
}

/// A fatal dispatch failure, labelled with the step it happened in.
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct DispatchError {
    pub step: Step,
    #[source]
    pub source: DispatchFailure,
}

#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("template rendering failed: {0}")]
    Render(#[from] RenderError),
}

impl DispatchError {
    pub fn new(step: Step, source: impl Into<DispatchFailure>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(source: reqwest::Error) -> Self {
        if source.is_status() {
            if let Some(status) = source.status() {
                return Self::HttpStatus {
                    status,
                    body: String::new(),
                };
            }
        }
        Self::Request { source }
    }
}

impl TrackerError {
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Request { .. } | Self::HttpStatus { .. } | Self::Json { .. } | Self::Timeout { .. }
        )
    }
}

impl Error {
    /// Only failures that happened before a ticket could have been created
    /// are safe to retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Dispatch(DispatchError {
                step: Step::Deduplicating,
                source: DispatchFailure::Tracker(err),
            }) => err.is_transport(),
            _ => false,
        }
    }
}

fn format_field_errors(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{DispatchError, Error, TrackerError};
    use crate::dispatch::Step;

    #[test]
    fn dispatch_error_display_carries_step_label() {
        let err = DispatchError::new(Step::Creating, TrackerError::Timeout { operation: "create" });
        assert_eq!(err.to_string(), "creating ticket: create timed out");
    }

    #[test]
    fn validation_error_lists_fields() {
        let mut errors = BTreeMap::new();
        errors.insert("priority".to_string(), "not allowed".to_string());
        errors.insert("assignee".to_string(), "unknown user".to_string());
        let err = TrackerError::Validation { errors };
        assert_eq!(
            err.to_string(),
            "tracker rejected the ticket: assignee: unknown user; priority: not allowed"
        );
    }

    #[test]
    fn only_dedup_transport_failures_are_retriable() {
        let dedup = Error::from(DispatchError::new(
            Step::Deduplicating,
            TrackerError::Timeout { operation: "search" },
        ));
        assert!(dedup.is_retriable());

        let create = Error::from(DispatchError::new(
            Step::Creating,
            TrackerError::Timeout { operation: "create" },
        ));
        assert!(!create.is_retriable());

        let rejected = Error::from(DispatchError::new(
            Step::Deduplicating,
            TrackerError::Validation {
                errors: BTreeMap::new(),
            },
        ));
        assert!(!rejected.is_retriable());
    }
}
