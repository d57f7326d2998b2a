#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod expr;
pub mod fields;
pub mod fingerprint;
pub mod priority;
pub mod resolve;
pub mod tags;
pub mod telemetry;
pub mod template;
pub mod tracker;
pub mod types;

pub type Result<T> = std::result::Result<T, error::Error>;
