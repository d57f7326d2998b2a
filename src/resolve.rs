//! Case-insensitive property lookup and the "event property over static
//! default" layering shared by every resolvable ticket field.

use crate::event::{Properties, PropertyValue};

/// Where a resolved field value came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldSource {
    Property,
    Default,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedField {
    pub source: FieldSource,
    pub value: String,
}

/// Raw case-insensitive lookup. A present `null` is returned as such; the
/// first key in property order wins when several differ only by case.
#[must_use]
pub fn lookup<'a>(properties: &'a Properties, name: Option<&str>) -> Option<&'a PropertyValue> {
    let name = fold_case(name.filter(|n| !n.is_empty())?);
    properties
        .iter()
        .find(|(key, _)| fold_case(key) == name)
        .map(|(_, value)| value)
}

/// Case folding shared by property names, labels and priority keys.
#[must_use]
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// Lookup that only reports a property as found when it carries a non-empty
/// value. Null, empty strings and empty arrays are "not found".
#[must_use]
pub fn resolve<'a>(properties: &'a Properties, name: Option<&str>) -> Option<&'a PropertyValue> {
    lookup(properties, name).filter(|value| has_content(value))
}

/// Resolve a field as a string: the override property when it yields a
/// non-empty scalar, otherwise the non-empty static default.
#[must_use]
pub fn resolve_field(
    properties: &Properties,
    property: Option<&str>,
    default: Option<&str>,
) -> Option<ResolvedField> {
    if let Some(value) = resolve(properties, property)
        .and_then(PropertyValue::as_scalar_string)
        .filter(|value| !value.trim().is_empty())
    {
        return Some(ResolvedField {
            source: FieldSource::Property,
            value,
        });
    }
    default
        .filter(|value| !value.trim().is_empty())
        .map(|value| ResolvedField {
            source: FieldSource::Default,
            value: value.to_string(),
        })
}

fn has_content(value: &PropertyValue) -> bool {
    match value {
        PropertyValue::Null => false,
        PropertyValue::String(s) => !s.trim().is_empty(),
        PropertyValue::Array(items) => !items.is_empty(),
        PropertyValue::Object(props) => !props.is_empty(),
        PropertyValue::Bool(_) | PropertyValue::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FieldSource, ResolvedField, fold_case, lookup, resolve, resolve_field};
    use crate::event::{Properties, PropertyValue};

    fn props(value: serde_json::Value) -> Properties {
        match PropertyValue::from(value) {
            PropertyValue::Object(props) => props,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    #[test]
    fn lookup_ignores_case() {
        let properties = props(json!({"Assignee": "alice"}));
        assert_eq!(
            lookup(&properties, Some("assignee")),
            Some(&PropertyValue::from("alice"))
        );
        assert_eq!(lookup(&properties, Some("ASSIGNEE")).map(ToString::to_string).as_deref(), Some("alice"));
    }

    #[test]
    fn empty_or_missing_name_is_not_found() {
        let properties = props(json!({"": "x", "Assignee": "alice"}));
        assert!(lookup(&properties, None).is_none());
        assert!(lookup(&properties, Some("")).is_none());
    }

    #[test]
    fn null_property_falls_through_to_default() {
        let properties = props(json!({"Priority": null}));
        assert!(lookup(&properties, Some("Priority")).is_some());
        assert!(resolve(&properties, Some("Priority")).is_none());
        assert_eq!(
            resolve_field(&properties, Some("Priority"), Some("High")),
            Some(ResolvedField {
                source: FieldSource::Default,
                value: "High".to_string(),
            })
        );
    }

    #[test]
    fn blank_string_does_not_override() {
        let properties = props(json!({"Assignee": "  "}));
        let resolved = resolve_field(&properties, Some("Assignee"), Some("bob"));
        assert_eq!(resolved.map(|r| r.value), Some("bob".to_string()));
    }

    #[test]
    fn property_overrides_default() {
        let properties = props(json!({"assignee": "alice", "Points": 3}));
        let resolved = resolve_field(&properties, Some("Assignee"), Some("bob"));
        assert_eq!(
            resolved,
            Some(ResolvedField {
                source: FieldSource::Property,
                value: "alice".to_string(),
            })
        );
        let numeric = resolve_field(&properties, Some("points"), None);
        assert_eq!(numeric.map(|r| r.value), Some("3".to_string()));
    }

    #[test]
    fn nothing_resolves_without_property_or_default() {
        let properties = props(json!({"Other": "x"}));
        assert!(resolve_field(&properties, Some("Assignee"), None).is_none());
        assert!(resolve_field(&properties, None, Some("")).is_none());
    }

    #[test]
    fn non_ascii_names_match_case_insensitively() {
        let properties = props(json!({"Größe": "XL", "ÄRGER": 3}));
        assert_eq!(lookup(&properties, Some("GRÖßE")), Some(&PropertyValue::from(json!("XL"))));
        assert_eq!(lookup(&properties, Some("ärger")), Some(&PropertyValue::from(json!(3))));
        assert_eq!(fold_case("ÄRGER"), fold_case("Ärger"));
    }
}
