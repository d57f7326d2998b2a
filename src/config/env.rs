//! Environment overrides applied on top of the file configuration. A variable
//! that is set but blank counts as unset.

use std::str::FromStr;
use std::time::Duration;

use humantime::parse_duration;

use crate::error::ConfigError;

use super::serde::split_items;

pub(super) fn env_string(key: &'static str) -> std::result::Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(ConfigError::Other(format!("{key}: {err}"))),
    }
}

pub(super) fn env_parse<T>(key: &'static str) -> std::result::Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)?
        .map(|raw| parse_value(key, &raw, |v| v.parse::<T>().map_err(|e| e.to_string())))
        .transpose()
}

pub(super) fn env_bool(key: &'static str) -> std::result::Result<Option<bool>, ConfigError> {
    env_string(key)?
        .map(|raw| parse_value(key, &raw, parse_flag))
        .transpose()
}

pub(super) fn env_duration(
    key: &'static str,
) -> std::result::Result<Option<Duration>, ConfigError> {
    env_string(key)?
        .map(|raw| parse_value(key, &raw, |v| parse_duration(v).map_err(|e| e.to_string())))
        .transpose()
}

pub(super) fn env_list(key: &'static str) -> std::result::Result<Option<Vec<String>>, ConfigError> {
    Ok(env_string(key)?.map(|raw| split_items(raw.split(','))))
}

fn parse_value<T>(
    key: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> std::result::Result<T, String>,
) -> std::result::Result<T, ConfigError> {
    parse(raw.trim()).map_err(|message| ConfigError::InvalidField {
        field: key,
        message,
    })
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}
