use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use ticketing::dispatch::{AbortReason, DispatchOutcome, Dispatcher, Step};
use ticketing::error::Error;
use ticketing::event::Event;
use ticketing::tracker::TicketTracker;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Dispatch `event`, retrying with exponential backoff while the failure is
/// retriable. Only duplicate-search transport errors qualify; once creation
/// has been attempted the error is returned as is.
pub async fn dispatch_with_retry<T: TicketTracker>(
    dispatcher: &Dispatcher<T>,
    event: &Event,
    cancel: &CancellationToken,
    retry_for: Duration,
) -> Result<DispatchOutcome, Error> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(200))
        .with_multiplier(2.0)
        .with_randomization_factor(0.25)
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(retry_for))
        .build();

    let mut attempt: u32 = 1;
    loop {
        let err = match dispatcher.dispatch(event, cancel).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => Error::from(err),
        };
        if !err.is_retriable() {
            return Err(err);
        }
        let Some(delay) = backoff.next_backoff() else {
            return Err(err);
        };
        warn!(
            event_id = %event.id,
            attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "retrying after duplicate search failure"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(DispatchOutcome::Aborted(AbortReason::Cancelled {
                    step: Step::Deduplicating,
                }));
            }
            () = sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use ticketing::dispatch::{DispatchOutcome, DispatchSettings, Dispatcher};
    use ticketing::error::TrackerError;
    use ticketing::event::Event;
    use ticketing::fields::{FieldAssembler, FieldSet, FieldSettings};
    use ticketing::priority::PriorityMapper;
    use ticketing::template::{HostInfo, PlaceholderRenderer};
    use ticketing::tracker::{CreateResponse, SearchResult, TicketTracker};
    use ticketing::types::Priority;
    use tokio_util::sync::CancellationToken;

    use super::dispatch_with_retry;

    /// Search fails `failures` times before succeeding.
    struct FlakySearch {
        failures: usize,
        searches: AtomicUsize,
        creates: AtomicUsize,
    }

    impl TicketTracker for FlakySearch {
        async fn search(&self, _query: &str) -> Result<SearchResult, TrackerError> {
            let n = self.searches.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(TrackerError::Timeout { operation: "search" });
            }
            Ok(SearchResult::default())
        }

        async fn create(&self, _fields: &FieldSet) -> Result<CreateResponse, TrackerError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(TrackerError::Timeout { operation: "create" })
        }

        async fn comment(&self, _key: &str, _body: &str) -> Result<(), TrackerError> {
            Ok(())
        }
    }

    fn dispatcher(failures: usize) -> Dispatcher<FlakySearch> {
        let settings = FieldSettings {
            project_key: "OPS".to_string(),
            issue_type: "Bug".to_string(),
            fingerprint_field: Some(10_042),
            ..FieldSettings::default()
        };
        let assembler = FieldAssembler::new(
            settings,
            PriorityMapper::Single(Priority::Medium),
            Arc::new(PlaceholderRenderer),
            HostInfo::default(),
        );
        Dispatcher::new(
            FlakySearch {
                failures,
                searches: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
            },
            assembler,
            DispatchSettings::default(),
        )
    }

    fn event() -> Event {
        match Event::from_clef(r#"{"@t":"2024-01-01T00:00:00Z","@l":"Error","@m":"boom"}"#) {
            Ok(event) => event,
            Err(err) => panic!("bad test event: {err}"),
        }
    }

    #[tokio::test]
    async fn search_failures_are_retried_but_create_failures_are_not() {
        let dispatcher = dispatcher(2);
        let result =
            dispatch_with_retry(&dispatcher, &event(), &CancellationToken::new(), Duration::from_secs(10))
                .await;
        assert!(result.is_err());
        assert_eq!(dispatcher.tracker().searches.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.tracker().creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let dispatcher = dispatcher(usize::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome =
            dispatch_with_retry(&dispatcher, &event(), &cancel, Duration::from_secs(10)).await;
        assert!(matches!(outcome, Ok(DispatchOutcome::Aborted(_))));
        assert_eq!(dispatcher.tracker().creates.load(Ordering::SeqCst), 0);
    }
}
