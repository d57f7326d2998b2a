use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::error::TrackerError;
use crate::fields::FieldSet;

use super::TicketTracker;
use super::models::{CreateResponse, SearchResult};

/// Tracker that never leaves the process: searches find nothing, creations
/// are logged and numbered locally.
#[derive(Debug, Default)]
pub struct DryRunTracker {
    created: AtomicU64,
}

impl DryRunTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl TicketTracker for DryRunTracker {
    async fn search(&self, query: &str) -> Result<SearchResult, TrackerError> {
        info!(query, "dry run: skipping search");
        Ok(SearchResult::default())
    }

    async fn create(&self, fields: &FieldSet) -> Result<CreateResponse, TrackerError> {
        let n = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = serde_json::to_string(fields).map_err(|err| TrackerError::Json {
            message: err.to_string(),
        })?;
        info!(key = %format!("DRY-{n}"), fields = %payload, "dry run: ticket not created");
        Ok(CreateResponse::created(format!("DRY-{n}")))
    }

    async fn comment(&self, key: &str, body: &str) -> Result<(), TrackerError> {
        info!(key, chars = body.chars().count(), "dry run: comment not posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DryRunTracker;
    use crate::fields::FieldSet;
    use crate::tracker::TicketTracker;

    #[tokio::test]
    async fn numbers_tickets_locally() {
        let tracker = DryRunTracker::new();
        let first = tracker.create(&FieldSet::default()).await;
        let second = tracker.create(&FieldSet::default()).await;
        assert_eq!(first.ok().and_then(|r| r.key).as_deref(), Some("DRY-1"));
        assert_eq!(second.ok().and_then(|r| r.key).as_deref(), Some("DRY-2"));
        assert_eq!(tracker.created(), 2);
        assert_eq!(tracker.search("anything").await.map(|r| r.total).ok(), Some(0));
    }
}
