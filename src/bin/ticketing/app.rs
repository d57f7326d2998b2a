use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, bounded};
use ticketing::Result;
use ticketing::config::Config;
use ticketing::dispatch::{AbortReason, DispatchOutcome, Dispatcher};
use ticketing::error::{ConfigError, Error};
use ticketing::event::Event;
use ticketing::fields::FieldAssembler;
use ticketing::telemetry::init_tracing;
use ticketing::template::{PlaceholderRenderer, TemplateRenderer};
use ticketing::tracker::{DryRunTracker, JiraClient, TicketTracker};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cli::Cli;
use super::retry::dispatch_with_retry;

const DEFAULT_CONFIG: &str = "ticketing.toml";

/// Per-worker counts, summed when the run ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct Tally {
    pub(super) created: usize,
    pub(super) skipped: usize,
    pub(super) cancelled: usize,
    pub(super) failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: &std::result::Result<DispatchOutcome, Error>) {
        match outcome {
            Ok(DispatchOutcome::Created { .. }) => self.created += 1,
            Ok(DispatchOutcome::Aborted(AbortReason::Cancelled { .. })) => self.cancelled += 1,
            Ok(DispatchOutcome::Aborted(_)) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    const fn merge(self, other: Self) -> Self {
        Self {
            created: self.created + other.created,
            skipped: self.skipped + other.skipped,
            cancelled: self.cancelled + other.cancelled,
            failed: self.failed + other.failed,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_filter.as_deref(), cli.json_logs)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::from_env_and_file(&config_path)?;

    if let Some(concurrency) = cli.concurrency {
        if concurrency == 0 {
            return Err(Error::from(ConfigError::InvalidField {
                field: "cli.concurrency",
                message: "at least one worker is required".to_string(),
            }));
        }
        config.dispatch.concurrency = concurrency;
    }

    let renderer: Arc<dyn TemplateRenderer> = Arc::new(PlaceholderRenderer);
    let assembler = FieldAssembler::new(
        config.fields.clone(),
        config.priority_mapper(),
        renderer,
        config.host.clone(),
    );

    let tally = if cli.dry_run {
        info!("dry run: no ticket will be created");
        let dispatcher = Dispatcher::new(DryRunTracker::new(), assembler, config.dispatch_settings());
        serve(dispatcher, &config, cli.input.as_deref(), cli.retry_for).await?
    } else {
        let client = JiraClient::new(
            config.tracker.url.clone(),
            config.tracker.username.clone(),
            config.tracker.password.clone(),
            config.tracker.request_timeout,
            config.tracker.connect_timeout,
            cli.insecure,
        )?;
        let dispatcher = Dispatcher::new(client, assembler, config.dispatch_settings());
        serve(dispatcher, &config, cli.input.as_deref(), cli.retry_for).await?
    };

    info!(
        created = tally.created,
        skipped = tally.skipped,
        cancelled = tally.cancelled,
        failed = tally.failed,
        "all events processed"
    );
    Ok(())
}

/// Feed the events of `input` through a bounded queue to the dispatch
/// workers. Ctrl-C stops reading and cancels in-flight dispatches.
pub(super) async fn serve<T: TicketTracker>(
    dispatcher: Dispatcher<T>,
    config: &Config,
    input: Option<&Path>,
    retry_for: Duration,
) -> Result<Tally> {
    let dispatcher = Arc::new(
        dispatcher.with_recent_fingerprints(config.dispatch.dedup_cache_size, config.dispatch.dedup_lock_ttl),
    );
    let cancel = CancellationToken::new();
    let (tx, rx) = bounded::<Event>(config.dispatch.queue_bound);

    let mut workers = JoinSet::new();
    for worker in 0..config.dispatch.concurrency {
        workers.spawn(run_worker(
            worker,
            Arc::clone(&dispatcher),
            rx.clone(),
            cancel.clone(),
            retry_for,
        ));
    }
    drop(rx);

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, cancelling in-flight dispatches");
                cancel.cancel();
            }
        })
    };

    let read = read_events(input, &tx, &cancel).await;
    tx.close();

    let mut tally = Tally::default();
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(worker_tally) => tally = tally.merge(worker_tally),
            Err(join_err) => warn!(error = %join_err, "dispatch worker terminated unexpectedly"),
        }
    }
    interrupt.abort();

    let queued = read?;
    debug!(queued, "input exhausted");
    Ok(tally)
}

async fn run_worker<T: TicketTracker>(
    worker: usize,
    dispatcher: Arc<Dispatcher<T>>,
    rx: Receiver<Event>,
    cancel: CancellationToken,
    retry_for: Duration,
) -> Tally {
    let mut tally = Tally::default();
    while let Ok(event) = rx.recv().await {
        let outcome = dispatch_with_retry(&dispatcher, &event, &cancel, retry_for).await;
        if let Err(err) = &outcome {
            error!(worker, event_id = %event.id, error = %err, "event not turned into a ticket");
        }
        tally.record(&outcome);
    }
    tally
}

/// Read CLEF lines into the queue. Returns how many events were queued.
async fn read_events(
    input: Option<&Path>,
    tx: &Sender<Event>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let origin = input.map_or_else(|| "stdin".to_string(), |path| path.display().to_string());
    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(tokio::fs::File::open(path).await.map_err(|source| {
            Error::Input {
                origin: origin.clone(),
                source,
            }
        })?),
        None => Box::new(tokio::io::stdin()),
    };

    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0usize;
    let mut queued = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };
        let Some(line) = next.map_err(|source| Error::Input {
            origin: origin.clone(),
            source,
        })?
        else {
            break;
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event = match Event::from_clef(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(%origin, line = line_no, error = %err, "skipping line that is not a CLEF event");
                continue;
            }
        };
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = tx.send(event) => sent,
        };
        if sent.is_err() {
            break;
        }
        queued += 1;
    }
    Ok(queued)
}
