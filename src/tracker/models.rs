use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fields::FieldSet;

const BODY_PREVIEW_LIMIT: usize = 256;

/// Outcome of a ticket search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub total: u64,
    pub keys: Vec<String>,
}

/// Outcome of a create call that reached the tracker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateResponse {
    pub key: Option<String>,
    pub errors: BTreeMap<String, String>,
}

impl CreateResponse {
    #[must_use]
    pub fn created(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            errors: BTreeMap::new(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct CreateRequest<'a> {
    pub(super) fields: &'a FieldSet,
}

#[derive(Serialize)]
pub(super) struct CommentRequest<'a> {
    pub(super) body: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawSearch {
    #[serde(default)]
    pub(super) total: u64,
    #[serde(default)]
    pub(super) issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawIssue {
    pub(super) key: String,
}

/// Create responses and 400 rejections share this shape.
#[derive(Debug, Default, Deserialize)]
pub(super) struct RawCreate {
    #[serde(default)]
    pub(super) key: Option<String>,
    #[serde(default, rename = "errorMessages")]
    pub(super) error_messages: Vec<String>,
    #[serde(default)]
    pub(super) errors: BTreeMap<String, String>,
}

impl From<RawSearch> for SearchResult {
    fn from(raw: RawSearch) -> Self {
        Self {
            total: raw.total,
            keys: raw.issues.into_iter().map(|issue| issue.key).collect(),
        }
    }
}

impl From<RawCreate> for CreateResponse {
    fn from(raw: RawCreate) -> Self {
        let mut errors = raw.errors;
        if !raw.error_messages.is_empty() {
            errors.insert("errorMessages".to_string(), raw.error_messages.join("; "));
        }
        Self {
            key: raw.key.filter(|key| !key.is_empty()),
            errors,
        }
    }
}

pub(super) fn body_preview(body: &[u8]) -> String {
    if body.is_empty() {
        return "<empty>".to_string();
    }
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    let mut preview = String::from_utf8_lossy(&body[..end]).to_string();
    if body.len() > BODY_PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview.replace('\n', "\\n")
}
