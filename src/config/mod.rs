use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::dispatch::DispatchSettings;
use crate::error::Error;
use crate::fields::FieldSettings;
use crate::priority::PriorityMapper;
use crate::template::HostInfo;
use crate::types::{Level, Priority};

mod defaults;
mod env;
mod raw;
mod serde;

pub(crate) use serde::HumantimeDuration;

#[derive(Debug, Clone)]
pub struct Config {
    pub tracker: TrackerSettings,
    pub fields: FieldSettings,
    pub priority: PrioritySettings,
    pub dispatch: DispatchConfig,
    pub host: HostInfo,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Raw priority settings; turned into a [`PriorityMapper`] once at startup.
#[derive(Debug, Clone)]
pub struct PrioritySettings {
    pub setting: Option<String>,
    pub property: Option<String>,
    pub default: Priority,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub levels: Vec<Level>,
    pub properties_as_comment: bool,
    pub concurrency: usize,
    pub queue_bound: usize,
    pub dedup_cache_size: NonZeroUsize,
    /// How long a created fingerprint stays claimed locally.
    pub dedup_lock_ttl: Duration,
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be read, parsed,
    /// when environment overrides are invalid, or when the resulting values
    /// fail validation.
    pub fn from_env_and_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut raw = raw::load(path).map_err(Error::from)?;
        raw.apply_env_overrides().map_err(Error::from)?;
        raw.validate_and_build()
    }

    /// Build the priority mapper. A malformed mapping is logged here and
    /// replaced by the default priority.
    #[must_use]
    pub fn priority_mapper(&self) -> PriorityMapper {
        PriorityMapper::install(
            self.priority.setting.as_deref(),
            self.priority.property.as_deref(),
            self.priority.default,
        )
    }

    #[must_use]
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            levels: self.dispatch.levels.clone(),
            properties_as_comment: self.dispatch.properties_as_comment,
            call_timeout: self.tracker.request_timeout + self.tracker.connect_timeout,
        }
    }
}
