use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use humantime::parse_duration;

#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Debug)]
#[command(author, version, about = "Turns structured log events into Jira tickets", long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// CLEF events, one JSON object per line. Reads standard input when absent.
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Number of events dispatched concurrently.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub concurrency: Option<usize>,

    /// How long a failed duplicate search keeps being retried (e.g. "30s").
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub retry_for: Duration,

    /// Allow plain HTTP tracker URLs.
    #[arg(long, action = ArgAction::SetTrue)]
    pub insecure: bool,

    /// Log the tickets that would be created without calling the tracker.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Emit JSON logs (`--features json-logs`).
    #[arg(long, action = ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Explicit log filter (e.g. "ticketing=debug").
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_read_stdin_and_retry_briefly() {
        let cli = match Cli::try_parse_from(["ticketing"]) {
            Ok(cli) => cli,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert!(cli.input.is_none());
        assert_eq!(cli.retry_for, Duration::from_secs(30));
        assert!(!cli.dry_run);
    }

    #[test]
    fn flags_are_parsed() {
        let cli = match Cli::try_parse_from([
            "ticketing",
            "--input",
            "events.clef",
            "--concurrency",
            "8",
            "--retry-for",
            "2m",
            "--dry-run",
        ]) {
            Ok(cli) => cli,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(cli.concurrency, Some(8));
        assert_eq!(cli.retry_for, Duration::from_secs(120));
        assert!(cli.dry_run);
    }
}
