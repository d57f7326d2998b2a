use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use ::config::FileFormat;
use serde_with::serde_as;
use url::Url;

use crate::Result;
use crate::error::ConfigError;
use crate::fields::FieldSettings;
use crate::tags::TagSet;
use crate::template::HostInfo;
use crate::types::{Level, Priority};

use super::defaults::{
    default_concurrency, default_connect_timeout, default_dedup_cache_size, default_dedup_lock_ttl,
    default_issue_type,
    default_priority_property, default_queue_bound, default_request_timeout,
    default_tags_property,
};
use super::env::{env_bool, env_duration, env_list, env_parse, env_string};
use super::serde::CommaList;
use super::{
    Config, DispatchConfig, HumantimeDuration, PrioritySettings, TrackerSettings,
};

/// Read `path` when it exists, then layer `TICKETING__SECTION__KEY` variables
/// on top.
pub(super) fn load(path: impl AsRef<Path>) -> std::result::Result<RawConfig, ConfigError> {
    let mut builder = ::config::Config::builder();
    let path = path.as_ref();
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        builder = builder.add_source(::config::File::from_str(&contents, FileFormat::Toml));
    }
    builder = builder.add_source(
        ::config::Environment::with_prefix("TICKETING")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .map_err(|err| ConfigError::Other(err.to_string()))?
        .try_deserialize()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub(super) tracker: RawTracker,
    #[serde(default)]
    pub(super) fields: RawFields,
    #[serde(default)]
    pub(super) dispatch: RawDispatch,
    #[serde(default)]
    pub(super) app: RawApp,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawTracker {
    pub(super) url: Option<String>,
    pub(super) username: Option<String>,
    pub(super) password: Option<String>,
    pub(super) project_key: Option<String>,
    #[serde(default = "default_issue_type")]
    pub(super) issue_type: String,
    #[serde(default)]
    pub(super) fingerprint_field: Option<u32>,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) request_timeout: Duration,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) connect_timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawFields {
    #[serde(default)]
    pub(super) project_property: Option<String>,
    #[serde(default)]
    pub(super) assignee: Option<String>,
    #[serde(default)]
    pub(super) assignee_property: Option<String>,
    #[serde(default)]
    pub(super) original_estimate: Option<String>,
    #[serde(default)]
    pub(super) original_estimate_property: Option<String>,
    #[serde(default)]
    pub(super) remaining_estimate: Option<String>,
    #[serde(default)]
    pub(super) remaining_estimate_property: Option<String>,
    #[serde(default)]
    pub(super) due_date: Option<String>,
    #[serde(default)]
    pub(super) due_date_property: Option<String>,
    #[serde(default)]
    pub(super) priority: Option<String>,
    #[serde(default = "default_priority_property")]
    pub(super) priority_property: Option<String>,
    #[serde(default)]
    pub(super) default_priority: Option<String>,
    #[serde(default)]
    #[serde_as(as = "CommaList")]
    pub(super) labels: Vec<String>,
    #[serde(default)]
    #[serde_as(as = "CommaList")]
    pub(super) components: Vec<String>,
    #[serde(default)]
    pub(super) dynamic_tags: bool,
    #[serde(default = "default_tags_property")]
    pub(super) tags_property: Option<String>,
    #[serde(default)]
    pub(super) level_as_label: bool,
    #[serde(default)]
    #[serde_as(as = "CommaList")]
    pub(super) title_properties: Vec<String>,
    #[serde(default)]
    pub(super) summary_template: Option<String>,
    #[serde(default)]
    pub(super) description_template: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawDispatch {
    #[serde(default)]
    #[serde_as(as = "CommaList")]
    pub(super) levels: Vec<String>,
    #[serde(default)]
    pub(super) full_details_in_description: bool,
    #[serde(default)]
    pub(super) properties_as_comment: bool,
    #[serde(default = "default_concurrency")]
    pub(super) concurrency: usize,
    #[serde(default = "default_queue_bound")]
    pub(super) queue_bound: usize,
    #[serde(default = "default_dedup_cache_size")]
    pub(super) dedup_cache_size: usize,
    #[serde(default = "default_dedup_lock_ttl")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) dedup_lock_ttl: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawApp {
    #[serde(default)]
    pub(super) server_url: Option<String>,
    #[serde(default)]
    pub(super) instance: Option<String>,
}

impl RawConfig {
    pub(super) fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        if let Some(url) = env_string("JIRA_URL")? {
            self.tracker.url = Some(url);
        }
        if let Some(username) = env_string("JIRA_USERNAME")? {
            self.tracker.username = Some(username);
        }
        if let Some(password) = env_string("JIRA_PASSWORD")? {
            self.tracker.password = Some(password);
        }
        if let Some(project) = env_string("JIRA_PROJECT_KEY")? {
            self.tracker.project_key = Some(project);
        }
        if let Some(field) = env_parse::<u32>("JIRA_FINGERPRINT_FIELD")? {
            self.tracker.fingerprint_field = Some(field);
        }
        if let Some(timeout) = env_duration("JIRA_REQUEST_TIMEOUT")? {
            self.tracker.request_timeout = timeout;
        }
        if let Some(levels) = env_list("TICKETING_LEVELS")? {
            self.dispatch.levels = levels;
        }
        if let Some(priority) = env_string("TICKETING_PRIORITY")? {
            self.fields.priority = Some(priority);
        }
        if let Some(concurrency) = env_parse::<usize>("TICKETING_CONCURRENCY")? {
            self.dispatch.concurrency = concurrency;
        }
        if let Some(dynamic) = env_bool("TICKETING_DYNAMIC_TAGS")? {
            self.fields.dynamic_tags = dynamic;
        }
        if let Some(server_url) = env_string("SEQ_SERVER_URL")? {
            self.app.server_url = Some(server_url);
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    pub(super) fn validate_and_build(self) -> Result<Config> {
        let url_str = non_empty(self.tracker.url).ok_or(ConfigError::MissingField {
            field: "tracker.url",
        })?;
        let url = Url::parse(&url_str).map_err(|err| ConfigError::InvalidField {
            field: "tracker.url",
            message: err.to_string(),
        })?;
        let username = non_empty(self.tracker.username).ok_or(ConfigError::MissingField {
            field: "tracker.username",
        })?;
        let project_key = non_empty(self.tracker.project_key).ok_or(
            ConfigError::MissingField {
                field: "tracker.project_key",
            },
        )?;
        let issue_type = self.tracker.issue_type.trim().to_string();
        if issue_type.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "tracker.issue_type",
                message: "issue type cannot be empty".to_string(),
            }
            .into());
        }
        if self.tracker.fingerprint_field == Some(0) {
            return Err(ConfigError::InvalidField {
                field: "tracker.fingerprint_field",
                message: "custom field numbers start at 1".to_string(),
            }
            .into());
        }
        if self.tracker.request_timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "tracker.request_timeout",
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }

        let default_priority = match non_empty(self.fields.default_priority) {
            Some(raw) => raw
                .parse::<Priority>()
                .map_err(|message| ConfigError::InvalidField {
                    field: "fields.default_priority",
                    message,
                })?,
            None => Priority::default(),
        };

        if self.dispatch.concurrency == 0 {
            return Err(ConfigError::InvalidField {
                field: "dispatch.concurrency",
                message: "at least one worker is required".to_string(),
            }
            .into());
        }
        if self.dispatch.queue_bound == 0 {
            return Err(ConfigError::InvalidField {
                field: "dispatch.queue_bound",
                message: "queue bound must be greater than zero".to_string(),
            }
            .into());
        }
        let dedup_cache_size = NonZeroUsize::new(self.dispatch.dedup_cache_size).ok_or(
            ConfigError::InvalidField {
                field: "dispatch.dedup_cache_size",
                message: "dedup cache size must be greater than zero".to_string(),
            },
        )?;
        if self.dispatch.dedup_lock_ttl.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "dispatch.dedup_lock_ttl",
                message: "lock window must be greater than zero".to_string(),
            }
            .into());
        }

        let server_url = non_empty(self.app.server_url);
        if let Some(server_url) = server_url.as_deref() {
            Url::parse(server_url).map_err(|err| ConfigError::InvalidField {
                field: "app.server_url",
                message: err.to_string(),
            })?;
        }

        let fields = FieldSettings {
            project_key,
            project_property: non_empty(self.fields.project_property),
            issue_type,
            reporter: username.clone(),
            assignee: non_empty(self.fields.assignee),
            assignee_property: non_empty(self.fields.assignee_property),
            original_estimate: non_empty(self.fields.original_estimate),
            original_estimate_property: non_empty(self.fields.original_estimate_property),
            remaining_estimate: non_empty(self.fields.remaining_estimate),
            remaining_estimate_property: non_empty(self.fields.remaining_estimate_property),
            due_date: non_empty(self.fields.due_date),
            due_date_property: non_empty(self.fields.due_date_property),
            components: self.fields.components,
            labels: TagSet::from_csv(&self.fields.labels.join(",")),
            level_as_label: self.fields.level_as_label,
            dynamic_tags: self.fields.dynamic_tags,
            tags_property: non_empty(self.fields.tags_property),
            title_properties: self.fields.title_properties,
            summary_template: non_empty(self.fields.summary_template),
            description_template: non_empty(self.fields.description_template),
            fingerprint_field: self.tracker.fingerprint_field,
            full_details_in_description: self.dispatch.full_details_in_description,
        };

        Ok(Config {
            tracker: TrackerSettings {
                url,
                username,
                password: SecretString::from(self.tracker.password.unwrap_or_default()),
                request_timeout: self.tracker.request_timeout,
                connect_timeout: self.tracker.connect_timeout,
            },
            fields,
            priority: PrioritySettings {
                setting: non_empty(self.fields.priority),
                property: non_empty(self.fields.priority_property),
                default: default_priority,
            },
            dispatch: DispatchConfig {
                levels: Level::parse_list(&self.dispatch.levels.join(",")),
                properties_as_comment: self.dispatch.properties_as_comment,
                concurrency: self.dispatch.concurrency,
                queue_bound: self.dispatch.queue_bound,
                dedup_cache_size,
                dedup_lock_ttl: self.dispatch.dedup_lock_ttl,
            },
            host: HostInfo {
                server_url,
                instance: non_empty(self.app.instance),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Default for RawTracker {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            project_key: None,
            issue_type: default_issue_type(),
            fingerprint_field: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for RawFields {
    fn default() -> Self {
        Self {
            project_property: None,
            assignee: None,
            assignee_property: None,
            original_estimate: None,
            original_estimate_property: None,
            remaining_estimate: None,
            remaining_estimate_property: None,
            due_date: None,
            due_date_property: None,
            priority: None,
            priority_property: default_priority_property(),
            default_priority: None,
            labels: Vec::new(),
            components: Vec::new(),
            dynamic_tags: false,
            tags_property: default_tags_property(),
            level_as_label: false,
            title_properties: Vec::new(),
            summary_template: None,
            description_template: None,
        }
    }
}

impl Default for RawDispatch {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            full_details_in_description: false,
            properties_as_comment: false,
            concurrency: default_concurrency(),
            queue_bound: default_queue_bound(),
            dedup_cache_size: default_dedup_cache_size(),
            dedup_lock_ttl: default_dedup_lock_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ::config::{File, FileFormat};

    use super::RawConfig;
    use crate::error::{ConfigError, Error};
    use crate::priority::PriorityMapper;
    use crate::types::{Level, Priority};

    fn parse(toml: &str) -> RawConfig {
        let built = ::config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build();
        match built.and_then(::config::Config::try_deserialize) {
            Ok(raw) => raw,
            Err(err) => panic!("invalid test config: {err}"),
        }
    }

    const MINIMAL: &str = r#"
        [tracker]
        url = "https://jira.example.com"
        username = "seq-bot"
        project_key = "OPS"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = match parse(MINIMAL).validate_and_build() {
            Ok(config) => config,
            Err(err) => panic!("config should validate: {err}"),
        };
        assert_eq!(config.fields.issue_type, "Bug");
        assert_eq!(config.fields.reporter, "seq-bot");
        assert_eq!(config.fields.tags_property.as_deref(), Some("Tags"));
        assert_eq!(config.tracker.request_timeout, Duration::from_secs(10));
        assert_eq!(config.priority.default, Priority::Medium);
        assert_eq!(config.priority_mapper(), PriorityMapper::Single(Priority::Medium));
        assert!(config.dispatch.levels.is_empty());
        assert_eq!(config.dispatch.concurrency, 4);
        assert_eq!(config.dispatch.dedup_lock_ttl, Duration::from_secs(60));
        assert_eq!(config.dispatch_settings().call_timeout, Duration::from_secs(15));
    }

    #[test]
    fn full_config_is_mapped() {
        let toml = format!(
            r#"{MINIMAL}
            fingerprint_field = 10042
            request_timeout = "3s"

            [fields]
            priority = "Error=Highest,Fatal=Highest,Warning=Low"
            default_priority = "low"
            labels = "ops, Ops, backend"
            components = ["api", " ", "worker"]
            title_properties = "App,Machine"
            level_as_label = true

            [dispatch]
            levels = "Error, Fatal, bogus"
            properties_as_comment = true

            [app]
            server_url = "https://seq.example.com"
            instance = "prod"
            "#
        );
        let config = match parse(&toml).validate_and_build() {
            Ok(config) => config,
            Err(err) => panic!("config should validate: {err}"),
        };
        assert_eq!(config.fields.fingerprint_field, Some(10042));
        assert_eq!(config.fields.labels.len(), 2);
        assert_eq!(config.fields.components, vec!["api", "worker"]);
        assert_eq!(config.fields.title_properties, vec!["App", "Machine"]);
        assert_eq!(config.dispatch.levels, vec![Level::Error, Level::Fatal]);
        assert_eq!(config.priority.default, Priority::Low);
        assert!(matches!(config.priority_mapper(), PriorityMapper::Mapping { .. }));
        assert_eq!(config.host.instance.as_deref(), Some("prod"));
        assert_eq!(config.tracker.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn missing_project_key_is_reported() {
        let raw = parse(
            r#"
            [tracker]
            url = "https://jira.example.com"
            username = "seq-bot"
            project_key = "  "
            "#,
        );
        match raw.validate_and_build() {
            Err(Error::Config(ConfigError::MissingField { field })) => {
                assert_eq!(field, "tracker.project_key");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (extra, expected) in [
            ("[fields]\ndefault_priority = \"urgent\"", "fields.default_priority"),
            ("[dispatch]\nconcurrency = 0", "dispatch.concurrency"),
            ("[dispatch]\ndedup_cache_size = 0", "dispatch.dedup_cache_size"),
            ("[dispatch]\ndedup_lock_ttl = \"0s\"", "dispatch.dedup_lock_ttl"),
            ("[app]\nserver_url = \"not a url\"", "app.server_url"),
        ] {
            let raw = parse(&format!("{MINIMAL}\n{extra}"));
            match raw.validate_and_build() {
                Err(Error::Config(ConfigError::InvalidField { field, .. })) => {
                    assert_eq!(field, expected);
                }
                other => panic!("{extra}: unexpected result: {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn malformed_priority_mapping_does_not_fail_startup() {
        let raw = parse(&format!("{MINIMAL}\n[fields]\npriority = \"Error=Urgent\"\ndefault_priority = \"High\""));
        let config = match raw.validate_and_build() {
            Ok(config) => config,
            Err(err) => panic!("config should validate: {err}"),
        };
        assert_eq!(config.priority_mapper(), PriorityMapper::Single(Priority::High));
    }
}
