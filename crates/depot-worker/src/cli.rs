use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "depot-worker", version)]
#[command(about = "Persistent job queue worker. Runs the worker pool by default.")]
pub(crate) struct Cli {
    /// Configuration directory (defaults to ./config).
    #[arg(long, global = true)]
    pub(crate) config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum Command {
    /// Run the worker pool and scheduler until SIGINT or SIGTERM.
    Run,
    /// Print queue statistics as JSON.
    Stats,
    /// Delete finished jobs older than the retention window.
    Cleanup {
        /// Retention in days (defaults to jobs.queue.retention_days).
        #[arg(long)]
        days: Option<u32>,
    },
    /// Submit a job and print its id.
    Submit {
        /// Job type.
        #[arg(long = "type")]
        job_type: String,

        /// JSON payload.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Priority (higher runs first).
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i32>,

        /// Seconds before the job becomes claimable.
        #[arg(long)]
        delay_secs: Option<u64>,
    },
}

impl Cli {
    pub(crate) fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["depot-worker"]).unwrap();
        assert_eq!(cli.command(), Command::Run);
        assert!(cli.config_dir.is_none());
    }

    #[test]
    fn test_submit_args() {
        let cli = Cli::try_parse_from([
            "depot-worker",
            "submit",
            "--type",
            "email",
            "--payload",
            r#"{"to":"ops@example.com"}"#,
            "--priority",
            "-2",
            "--delay-secs",
            "30",
        ])
        .unwrap();

        assert_eq!(
            cli.command(),
            Command::Submit {
                job_type: "email".to_string(),
                payload: r#"{"to":"ops@example.com"}"#.to_string(),
                priority: Some(-2),
                delay_secs: Some(30),
            }
        );
    }

    #[test]
    fn test_cleanup_with_global_config_dir() {
        let cli =
            Cli::try_parse_from(["depot-worker", "cleanup", "--days", "3", "--config-dir", "/etc/depot"])
                .unwrap();
        assert_eq!(cli.command(), Command::Cleanup { days: Some(3) });
        assert_eq!(cli.config_dir, Some(PathBuf::from("/etc/depot")));
    }

    #[test]
    fn test_submit_requires_type() {
        assert!(Cli::try_parse_from(["depot-worker", "submit"]).is_err());
    }
}
