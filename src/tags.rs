//! Label aggregation: static labels merged with tags carried by an event
//! property, deduplicated without regard to case.

use std::collections::HashSet;

use crate::event::PropertyValue;
use crate::resolve::fold_case;

/// Insertion-ordered set of labels compared case-insensitively. The first
/// spelling of a label wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    labels: Vec<String>,
    seen: HashSet<String>,
}

impl TagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma separated list of labels.
    #[must_use]
    pub fn from_csv(raw: &str) -> Self {
        let mut set = Self::new();
        set.extend_csv(raw);
        set
    }

    /// Returns `false` when the label is blank or already present.
    pub fn insert(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() || !self.seen.insert(fold_case(label)) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    pub fn extend_csv(&mut self, raw: &str) {
        for label in raw.split(',') {
            self.insert(label);
        }
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.seen.contains(&fold_case(label.trim()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.labels
    }
}

/// Merge the dynamic tags found in `dynamic` into a copy of `static_labels`.
///
/// The property may hold an array (non-string elements are skipped) or a
/// single string; each string is split on commas. Anything else, a disabled
/// switch or an absent property leaves the static labels unchanged.
#[must_use]
pub fn compute_tags(
    static_labels: &TagSet,
    dynamic_enabled: bool,
    dynamic: Option<&PropertyValue>,
) -> TagSet {
    let mut tags = static_labels.clone();
    if !dynamic_enabled {
        return tags;
    }
    match dynamic {
        Some(PropertyValue::Array(items)) => {
            for item in items {
                if let PropertyValue::String(raw) = item {
                    tags.extend_csv(raw);
                }
            }
        }
        Some(PropertyValue::String(raw)) => tags.extend_csv(raw),
        _ => {}
    }
    tags
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{TagSet, compute_tags};
    use crate::event::PropertyValue;

    #[test]
    fn non_ascii_labels_fold_like_property_names() {
        let mut tags = TagSet::from_csv("Ärger");
        assert!(!tags.insert("ÄRGER"));
        assert!(tags.contains("ärger"));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn dynamic_tags_merge_case_insensitively() {
        let statics = TagSet::from_csv("a");
        let value = PropertyValue::from(json!(["A,b"]));
        let tags = compute_tags(&statics, true, Some(&value));
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("a"));
        assert!(tags.contains("B"));
    }

    #[test]
    fn disabled_or_absent_returns_static_labels() {
        let statics = TagSet::from_csv("ops, backend");
        let value = PropertyValue::from(json!(["urgent"]));
        assert_eq!(compute_tags(&statics, false, Some(&value)), statics);
        assert_eq!(compute_tags(&statics, true, None), statics);
        let number = PropertyValue::from(json!(42));
        assert_eq!(compute_tags(&statics, true, Some(&number)), statics);
    }

    #[test]
    fn non_string_array_elements_are_skipped() {
        let value = PropertyValue::from(json!([1, " x , y ", null, "Urgent", "urgent"]));
        let tags = compute_tags(&TagSet::new(), true, Some(&value));
        assert_eq!(tags.len(), 3);
        for label in ["x", "y", "urgent"] {
            assert!(tags.contains(label), "missing {label}");
        }
    }

    #[test]
    fn single_string_property_is_split() {
        let value = PropertyValue::from("db, network");
        let tags = compute_tags(&TagSet::from_csv("ops"), true, Some(&value));
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec!["ops", "db", "network"]);
    }

    #[test]
    fn blank_labels_are_ignored() {
        let tags = TagSet::from_csv(" , ,a,, A ");
        assert_eq!(tags.into_vec(), vec!["a".to_string()]);
    }
}
