#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, DemoConfig};
use handoff::{Dispatcher, DispatcherConfig, Job, TaskFailure, handler_fn};
use std::thread;
use std::time::Instant;
use telemetry::init_telemetry;

// Using mimalloc for steadier allocation across many worker threads,
// especially in musl environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const CHORES: [&str; 10] = [
    "Clean the house",
    "Wash the dishes",
    "Do the laundry",
    "Buy groceries",
    "Cook dinner",
    "Walk the dog",
    "Do the gardening",
    "Fold the clothes",
    "Take out the trash",
    "Water the plants",
];

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    init_telemetry()?;

    log_startup_info(&config);
    run(&config)
}

fn log_startup_info(_config: &DemoConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting chores with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting {} chores with {} workers",
            _config.jobs,
            _config.workers
        );
    }
}

fn chore(index: u64) -> String {
    let names = CHORES.len() as u64;
    let name = CHORES[(index % names) as usize];
    match index / names {
        0 => String::from(name),
        round => format!("{name} (round {})", round + 1),
    }
}

fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let work = config.work;
    let fail_every = config.fail_every;

    // At most one report per chore, all drained once the run is over.
    let (failures_tx, failures_rx) = crossbeam_channel::unbounded();

    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::new(config.workers)
            .thread_name("chore-worker")
            .failure_sink(failures_tx),
        handler_fn(move |_worker, job: Job<String>| {
            #[cfg(feature = "tracing")]
            tracing::info!("Worker {} started: {}", _worker, job.payload());

            thread::sleep(work);

            if fail_every.is_some_and(|n| job.id().0 % n == 0) {
                return Err(format!("gave up on '{}'", job.payload()).into());
            }

            #[cfg(feature = "tracing")]
            tracing::info!("Worker {} finished: {}", _worker, job.payload());
            Ok(())
        }),
    )?;

    let start = Instant::now();
    for index in 0..config.jobs {
        dispatcher.submit(Job::new(index + 1, chore(index)))?;
    }

    let finished = dispatcher.await_completion_timeout(config.completion_timeout);
    if !finished {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            "{} chores still running after {:?}",
            dispatcher.outstanding(),
            config.completion_timeout
        );
    }

    dispatcher.shutdown();
    let reports = dispatcher.join();
    let elapsed = start.elapsed();

    for _report in &reports {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Worker {} processed {} chores",
            _report.worker_id,
            _report.jobs_processed
        );
    }

    let failures: Vec<TaskFailure> = failures_rx.try_iter().collect();
    for _failure in &failures {
        #[cfg(feature = "tracing")]
        tracing::warn!("{_failure}");
    }

    let stats = dispatcher.stats();
    println!(
        "Completed {} of {} chores ({} failed) with {} workers in {:.2?}",
        stats.completed,
        config.jobs,
        failures.len(),
        config.workers,
        elapsed
    );

    if !finished {
        anyhow::bail!(
            "chores did not finish within {:?}",
            config.completion_timeout
        );
    }

    Ok(())
}
