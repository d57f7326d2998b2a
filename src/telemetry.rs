use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

use crate::Result;
use crate::error::Error;

/// Install the global tracing subscriber.
///
/// The filter is the first valid candidate among `explicit_filter`,
/// `RUST_LOG` and `info`.
///
/// # Errors
///
/// Returns an error if no filter candidate parses, if JSON output is requested
/// from a binary built without the `json-logs` feature, or if a global
/// subscriber is already installed.
pub fn init_tracing(explicit_filter: Option<&str>, use_json: bool) -> Result<()> {
    let filter = select_filter(explicit_filter, std::env::var("RUST_LOG").ok().as_deref())?;

    #[cfg(feature = "json-logs")]
    if use_json {
        let subscriber = Registry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true),
        );
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| Error::Telemetry(err.to_string()))?;
        return Ok(());
    }

    #[cfg(not(feature = "json-logs"))]
    if use_json {
        return Err(Error::Telemetry(
            "binary was built without the `json-logs` feature".to_string(),
        ));
    }

    let subscriber = Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr),
    );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| Error::Telemetry(err.to_string()))
}

fn select_filter(explicit: Option<&str>, env: Option<&str>) -> Result<EnvFilter> {
    [explicit, env, Some("info")]
        .into_iter()
        .flatten()
        .find_map(|candidate| EnvFilter::try_new(candidate).ok())
        .ok_or_else(|| Error::Telemetry("invalid log filter".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{init_tracing, select_filter};

    #[test]
    fn invalid_filters_fall_through_to_info() {
        let filter = match select_filter(Some("ticketing=loud"), Some("ticketing=nope")) {
            Ok(filter) => filter,
            Err(err) => panic!("fallback filter should parse: {err}"),
        };
        assert_eq!(filter.to_string(), "info");

        let filter = match select_filter(None, Some("ticketing=trace")) {
            Ok(filter) => filter,
            Err(err) => panic!("env filter should parse: {err}"),
        };
        assert_eq!(filter.to_string(), "ticketing=trace");
    }

    #[cfg(not(feature = "json-logs"))]
    #[test]
    fn json_output_requires_the_feature() {
        assert!(init_tracing(Some("info"), true).is_err());
    }

    #[test]
    fn second_installation_is_an_error() {
        let first = init_tracing(Some("ticketing=debug"), false);
        assert!(first.is_ok(), "first installation failed: {first:?}");
        assert!(init_tracing(Some("ticketing=debug"), false).is_err());
    }
}
