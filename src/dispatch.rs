//! End-to-end processing of one event into at most one ticket.
//!
//! A dispatch walks `Filtered -> Deduplicating -> Assembling -> Creating ->
//! Annotating -> Done`. The current [`Step`] is a local of each dispatch and
//! is attached to every fatal error, so concurrent dispatches never share it.

use std::fmt::{self, Display};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;
use lru::LruCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchFailure, TrackerError};
use crate::event::Event;
use crate::fields::{FieldAssembler, details_comment, properties_comment};
use crate::fingerprint::Fingerprint;
use crate::tracker::{TicketTracker, fingerprint_query};
use crate::types::Level;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Step {
    Filtered,
    Deduplicating,
    Assembling,
    Creating,
    Annotating,
    Done,
}

impl Step {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Filtered => "level filter",
            Self::Deduplicating => "searching for duplicates",
            Self::Assembling => "assembling fields",
            Self::Creating => "creating ticket",
            Self::Annotating => "adding comments",
            Self::Done => "done",
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AbortReason {
    LevelExcluded,
    /// `existing` is `None` when the local fingerprint lock caught it.
    DuplicateFound { existing: Option<String> },
    Cancelled { step: Step },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Created {
        key: String,
        /// Comments that could not be posted.
        failed_comments: usize,
    },
    Aborted(AbortReason),
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// Empty means every level is dispatched.
    pub levels: Vec<Level>,
    pub properties_as_comment: bool,
    /// Upper bound for each remote call.
    pub call_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            properties_as_comment: false,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Fingerprints claimed by dispatches of this process. Catches duplicates
/// that the tracker cannot find yet because the first ticket is still being
/// created or indexed. A claim older than `ttl` is free again, so the remote
/// search stays authoritative once the ticket is searchable.
pub struct RecentFingerprints {
    /// Keyed by (project, fingerprint), matching the scope of the search.
    cache: Mutex<LruCache<(String, Fingerprint), Instant>>,
    ttl: Duration,
}

impl RecentFingerprints {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// `false` if the fingerprint holds a live claim.
    pub fn claim(&self, project: &str, fingerprint: &Fingerprint) -> bool {
        let key = (project.to_string(), fingerprint.clone());
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache
            .get(&key)
            .is_some_and(|claimed| now.duration_since(*claimed) < self.ttl)
        {
            return false;
        }
        cache.put(key, now);
        true
    }

    pub fn release(&self, project: &str, fingerprint: &Fingerprint) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&(project.to_string(), fingerprint.clone()));
    }

    /// Whether the fingerprint holds a live claim.
    #[must_use]
    pub fn contains(&self, project: &str, fingerprint: &Fingerprint) -> bool {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(&(project.to_string(), fingerprint.clone()))
            .is_some_and(|claimed| claimed.elapsed() < self.ttl)
    }
}

/// Releases a claim when dropped unless the ticket got created.
struct Claim<'a> {
    recent: &'a RecentFingerprints,
    project: String,
    fingerprint: Fingerprint,
    keep: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.recent.release(&self.project, &self.fingerprint);
        }
    }
}

pub struct Dispatcher<T> {
    tracker: T,
    assembler: FieldAssembler,
    settings: DispatchSettings,
    recent: Option<RecentFingerprints>,
}

impl<T: TicketTracker> Dispatcher<T> {
    #[must_use]
    pub const fn new(tracker: T, assembler: FieldAssembler, settings: DispatchSettings) -> Self {
        Self {
            tracker,
            assembler,
            settings,
            recent: None,
        }
    }

    /// Enable the in-process fingerprint lock, holding each claim for `ttl`.
    /// Only consulted when a fingerprint field is configured.
    #[must_use]
    pub fn with_recent_fingerprints(mut self, capacity: NonZeroUsize, ttl: Duration) -> Self {
        self.recent = Some(RecentFingerprints::new(capacity, ttl));
        self
    }

    #[must_use]
    pub const fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] labelled with the failing step when the
    /// duplicate search, field assembly or ticket creation fails. Comment
    /// failures are logged and counted in the outcome instead.
    pub async fn dispatch(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let result = self.run(event, cancel).await;
        if let Err(err) = &result {
            match &err.source {
                DispatchFailure::Tracker(TrackerError::Validation { errors }) => {
                    error!(event_id = %event.id, step = %err.step, errors = ?errors, "tracker rejected the ticket");
                }
                source => error!(event_id = %event.id, step = %err.step, error = %source, "dispatch failed"),
            }
        }
        result
    }

    async fn run(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut step = Step::Filtered;
        if !self.settings.levels.is_empty() && !self.settings.levels.contains(&event.level) {
            debug!(event_id = %event.id, %step, level = %event.level, "level not selected; skipping");
            return Ok(DispatchOutcome::Aborted(AbortReason::LevelExcluded));
        }

        step = Step::Deduplicating;
        let fingerprint = Fingerprint::of(event.fingerprint_source());
        let field_settings = self.assembler.settings();
        let mut claim = None;
        if let Some(field) = field_settings.fingerprint_field {
            let project = self.assembler.project_key(event);
            if let Some(recent) = &self.recent {
                if !recent.claim(&project, &fingerprint) {
                    debug!(event_id = %event.id, %step, %fingerprint, "fingerprint already claimed locally; skipping");
                    return Ok(DispatchOutcome::Aborted(AbortReason::DuplicateFound {
                        existing: None,
                    }));
                }
                claim = Some(Claim {
                    recent,
                    project: project.clone(),
                    fingerprint: fingerprint.clone(),
                    keep: false,
                });
            }

            let query = fingerprint_query(&project, field, &fingerprint);
            let Some(found) = self
                .remote(step, "search", cancel, self.tracker.search(&query))
                .await?
            else {
                return Ok(cancelled(event, step));
            };
            if found.total > 0 {
                if let Some(claim) = claim.as_mut() {
                    claim.keep = true;
                }
                let existing = found.keys.into_iter().next();
                debug!(event_id = %event.id, %step, %fingerprint, existing = ?existing, "matching ticket exists; skipping");
                return Ok(DispatchOutcome::Aborted(AbortReason::DuplicateFound { existing }));
            }
        }

        step = Step::Assembling;
        let today = Local::now().date_naive();
        let fields = self
            .assembler
            .assemble(event, &fingerprint, today)
            .map_err(|err| DispatchError::new(step, err))?;

        step = Step::Creating;
        let Some(response) = self
            .remote(step, "create", cancel, self.tracker.create(&fields))
            .await?
        else {
            return Ok(cancelled(event, step));
        };
        let key = match response.key {
            Some(key) if response.errors.is_empty() => key,
            key => {
                let mut errors = response.errors;
                if key.is_none() && errors.is_empty() {
                    errors.insert("key".to_string(), "missing from create response".to_string());
                }
                return Err(DispatchError::new(step, TrackerError::Validation { errors }));
            }
        };
        if let Some(claim) = claim.as_mut() {
            claim.keep = true;
        }
        let url = self.tracker.browse_url(&key).unwrap_or_default();
        info!(event_id = %event.id, ticket = %key, %url, "ticket created");

        step = Step::Annotating;
        let mut comments = Vec::new();
        if !field_settings.full_details_in_description {
            comments.extend(details_comment(event));
        }
        if self.settings.properties_as_comment {
            comments.extend(properties_comment(event));
        }
        let mut failed_comments = 0;
        for body in &comments {
            match self
                .remote(step, "comment", cancel, self.tracker.comment(&key, body))
                .await
            {
                Ok(Some(())) => {}
                Ok(None) => {
                    warn!(event_id = %event.id, %step, ticket = %key, "cancelled; remaining comments not posted");
                    break;
                }
                Err(err) => {
                    failed_comments += 1;
                    warn!(event_id = %event.id, %step, ticket = %key, error = %err.source, "comment not posted");
                }
            }
        }

        step = Step::Done;
        debug!(event_id = %event.id, %step, ticket = %key, failed_comments, "dispatch finished");
        Ok(DispatchOutcome::Created {
            key,
            failed_comments,
        })
    }

    /// Run one remote call under the per-call timeout. `Ok(None)` means the
    /// dispatch was cancelled and the call abandoned.
    async fn remote<F, O>(
        &self,
        step: Step,
        operation: &'static str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<Option<O>, DispatchError>
    where
        F: Future<Output = Result<O, TrackerError>>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(self.settings.call_timeout, call) => match result {
                Ok(Ok(value)) => Ok(Some(value)),
                Ok(Err(err)) => Err(DispatchError::new(step, err)),
                Err(_) => Err(DispatchError::new(step, TrackerError::Timeout { operation })),
            },
        }
    }
}

fn cancelled(event: &Event, step: Step) -> DispatchOutcome {
    info!(event_id = %event.id, %step, "dispatch cancelled");
    DispatchOutcome::Aborted(AbortReason::Cancelled { step })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::{RecentFingerprints, Step};
    use crate::fingerprint::Fingerprint;

    #[test]
    fn step_labels_read_as_phrases() {
        assert_eq!(Step::Creating.to_string(), "creating ticket");
        assert_eq!(Step::Deduplicating.to_string(), "searching for duplicates");
    }

    const LONG: Duration = Duration::from_secs(600);

    #[test]
    fn recent_fingerprints_claim_once() {
        let recent = RecentFingerprints::new(NonZeroUsize::MIN, LONG);
        let fp = Fingerprint::of("boom");
        assert!(recent.claim("OPS", &fp));
        assert!(!recent.claim("OPS", &fp));
        recent.release("OPS", &fp);
        assert!(recent.claim("OPS", &fp));
    }

    #[test]
    fn recent_fingerprints_evict_oldest() {
        let recent = RecentFingerprints::new(NonZeroUsize::MIN, LONG);
        let first = Fingerprint::of("first");
        let second = Fingerprint::of("second");
        assert!(recent.claim("OPS", &first));
        assert!(recent.claim("OPS", &second));
        assert!(!recent.contains("OPS", &first));
        assert!(recent.contains("OPS", &second));
    }

    #[test]
    fn claims_are_scoped_by_project() {
        let recent = RecentFingerprints::new(NonZeroUsize::MIN.saturating_add(3), LONG);
        let fp = Fingerprint::of("disk full");
        assert!(recent.claim("PAY", &fp));
        assert!(recent.claim("OPS", &fp));
        assert!(!recent.claim("PAY", &fp));
    }

    #[test]
    fn claims_expire_after_ttl() {
        let recent = RecentFingerprints::new(NonZeroUsize::MIN.saturating_add(3), Duration::from_millis(20));
        let fp = Fingerprint::of("disk full");
        assert!(recent.claim("OPS", &fp));
        assert!(!recent.claim("OPS", &fp));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!recent.contains("OPS", &fp));
        assert!(recent.claim("OPS", &fp));
        assert!(recent.contains("OPS", &fp));
    }
}
