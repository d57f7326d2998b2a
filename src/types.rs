use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a log event, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    /// Parse a comma separated allow-list, silently skipping names that do
    /// not denote a level.
    #[must_use]
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut out = Vec::new();
        for level in raw.split(',').filter_map(|s| s.trim().parse::<Self>().ok()) {
            if !out.contains(&level) {
                out.push(level);
            }
        }
        out
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "vrb" | "trace" => Ok(Self::Verbose),
            "debug" | "dbg" => Ok(Self::Debug),
            "information" | "info" | "inf" => Ok(Self::Information),
            "warning" | "warn" | "wrn" => Ok(Self::Warning),
            "error" | "err" => Ok(Self::Error),
            "fatal" | "ftl" | "critical" => Ok(Self::Fatal),
            other => Err(format!("unknown event level: {other}")),
        }
    }
}

/// Ticket priority understood by the tracker.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Priority {
    Highest,
    High,
    #[default]
    Medium,
    Low,
    Lowest,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highest" => Ok(Self::Highest),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "lowest" => Ok(Self::Lowest),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}
