use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Longest simulated chore accepted on the command line.
pub const MAX_WORK_MS: u64 = 60_000;

/// Runtime configuration for the `handoff-demo` binary.
///
/// Every value can be given as a CLI flag or an environment variable
/// (including one loaded from `.env`). The defaults reproduce the classic
/// run: three workers splitting ten household chores that take two seconds
/// each.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "handoff-demo",
    version,
    about = "Runs a list of chores through a pool of handoff workers"
)]
pub struct CliArgs {
    /// Number of worker threads.
    ///
    /// Environment variable: `HANDOFF_WORKERS`
    #[arg(long, env = "HANDOFF_WORKERS", default_value_t = 3)]
    pub workers: usize,

    /// Number of chores to submit. Chore names repeat once the list runs out.
    ///
    /// Environment variable: `HANDOFF_JOBS`
    #[arg(long, env = "HANDOFF_JOBS", default_value_t = 10)]
    pub jobs: u64,

    /// Simulated duration of a single chore, in milliseconds.
    ///
    /// Environment variable: `HANDOFF_WORK_MS`
    #[arg(long, env = "HANDOFF_WORK_MS", default_value_t = 2000)]
    pub work_ms: u64,

    /// Make every Nth chore fail, to exercise failure reporting.
    ///
    /// Environment variable: `HANDOFF_FAIL_EVERY`
    #[arg(long, env = "HANDOFF_FAIL_EVERY")]
    pub fail_every: Option<u64>,

    /// How long to wait for all chores before giving up, in seconds.
    ///
    /// Environment variable: `HANDOFF_COMPLETION_TIMEOUT_SECS`
    #[arg(long, env = "HANDOFF_COMPLETION_TIMEOUT_SECS", default_value_t = 60)]
    pub completion_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub workers: usize,
    pub jobs: u64,
    pub work: Duration,
    pub fail_every: Option<u64>,
    pub completion_timeout: Duration,
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.workers == 0 {
            bail!("HANDOFF_WORKERS must be greater than 0");
        }

        if args.work_ms > MAX_WORK_MS {
            bail!(
                "HANDOFF_WORK_MS ({}) exceeds the maximum of {}",
                args.work_ms,
                MAX_WORK_MS
            );
        }

        if args.fail_every == Some(0) {
            bail!("HANDOFF_FAIL_EVERY must be greater than 0 when set");
        }

        if args.completion_timeout_secs == 0 {
            bail!("HANDOFF_COMPLETION_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            workers: args.workers,
            jobs: args.jobs,
            work: Duration::from_millis(args.work_ms),
            fail_every: args.fail_every,
            completion_timeout: Duration::from_secs(args.completion_timeout_secs),
        })
    }
}
