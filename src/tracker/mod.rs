//! The remote ticket tracker: search, create and comment.

pub(crate) mod client;
pub(crate) mod dry_run;
pub(crate) mod models;

use std::future::Future;

pub use client::JiraClient;
pub use dry_run::DryRunTracker;
pub use models::{CreateResponse, SearchResult};

use crate::error::TrackerError;
use crate::fields::FieldSet;
use crate::fingerprint::Fingerprint;

/// Ticket tracker capability used by the dispatcher.
#[allow(async_fn_in_trait)]
pub trait TicketTracker: Send + Sync + 'static {
    /// Run a query and report how many tickets match.
    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<SearchResult, TrackerError>> + Send;

    /// Create a ticket. Field-level rejections come back in
    /// [`CreateResponse::errors`] rather than as an `Err`.
    fn create(
        &self,
        fields: &FieldSet,
    ) -> impl Future<Output = Result<CreateResponse, TrackerError>> + Send;

    fn comment(
        &self,
        key: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), TrackerError>> + Send;

    /// Human-facing link to a ticket, if the tracker has one.
    fn browse_url(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Query matching tickets of `project` whose fingerprint field contains
/// `fingerprint`.
#[must_use]
pub fn fingerprint_query(project: &str, field: u32, fingerprint: &Fingerprint) -> String {
    format!(
        "project = \"{}\" AND cf[{field}] ~ \"{fingerprint}\"",
        escape_jql(project)
    )
}

fn escape_jql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::fingerprint_query;
    use crate::fingerprint::Fingerprint;

    #[test]
    fn query_targets_project_and_custom_field() {
        let fp = Fingerprint::of("boom");
        assert_eq!(
            fingerprint_query("OPS", 10042, &fp),
            format!("project = \"OPS\" AND cf[10042] ~ \"{fp}\"")
        );
    }

    #[test]
    fn project_key_is_quoted() {
        let fp = Fingerprint::of("boom");
        assert!(fingerprint_query("a\"b", 1, &fp).starts_with("project = \"a\\\"b\""));
    }
}
