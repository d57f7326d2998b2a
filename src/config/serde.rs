use std::fmt;
use std::time::Duration;

use humantime::parse_duration;
use serde::Deserialize;
use serde::de::{self, SeqAccess, Visitor};
use serde_with::DeserializeAs;

/// `"10s"`, `"1m 30s"` and other humantime spellings.
pub(crate) struct HumantimeDuration;

impl<'de> DeserializeAs<'de, Duration> for HumantimeDuration {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}

/// A list written either as `"a, b"` or as `["a", "b"]`. Blank items are
/// dropped and the rest trimmed.
pub(crate) struct CommaList;

impl<'de> DeserializeAs<'de, Vec<String>> for CommaList {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = Vec<String>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a comma separated string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
                Ok(split_items(value.split(',')))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    items.push(item);
                }
                Ok(split_items(items.iter().map(String::as_str)))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

pub(super) fn split_items<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;
    use serde_with::serde_as;

    use super::{CommaList, HumantimeDuration};

    #[serde_as]
    #[derive(Deserialize)]
    struct Sample {
        #[serde_as(as = "Option<HumantimeDuration>")]
        #[serde(default)]
        timeout: Option<Duration>,
        #[serde_as(as = "CommaList")]
        #[serde(default)]
        components: Vec<String>,
    }

    fn sample(json: &str) -> Sample {
        match serde_json::from_str(json) {
            Ok(value) => value,
            Err(err) => panic!("failed to parse sample json: {err}"),
        }
    }

    #[test]
    fn durations_use_humantime() {
        assert_eq!(
            sample(r#"{"timeout":" 1m 30s "}"#).timeout,
            Some(Duration::from_secs(90))
        );
        assert!(serde_json::from_str::<Sample>(r#"{"timeout":"soon"}"#).is_err());
    }

    #[test]
    fn lists_accept_both_spellings() {
        assert_eq!(sample(r#"{"components":"api, , worker"}"#).components, vec!["api", "worker"]);
        assert_eq!(
            sample(r#"{"components":[" api", ""]}"#).components,
            vec!["api"]
        );
        assert!(sample("{}").components.is_empty());
    }
}
