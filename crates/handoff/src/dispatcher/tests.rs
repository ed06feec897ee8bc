use crate::{
    Dispatcher, DispatcherConfig, Error, FailureKind, Job, JobId, WorkerExit, WorkerId,
    WorkerReport, WorkerState, handler_fn,
};
use core::fmt;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

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

/// A handler that parks on job `blocking_id` until released, announcing when
/// it has started. Every other job completes immediately.
struct Gate {
    started_tx: Sender<JobId>,
    started_rx: Receiver<JobId>,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl Gate {
    fn new() -> Self {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        Self {
            started_tx,
            started_rx,
            release_tx,
            release_rx,
        }
    }

    fn start_dispatcher(
        &self,
        workers: usize,
        blocking_id: u64,
        completed: Arc<AtomicU64>,
    ) -> Dispatcher<u64> {
        let started_tx = self.started_tx.clone();
        let release_rx = self.release_rx.clone();
        Dispatcher::start(
            workers,
            handler_fn(move |_, job: Job<u64>| {
                started_tx.send(job.id()).unwrap();
                if job.id() == JobId(blocking_id) {
                    release_rx.recv().unwrap();
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap()
    }

    fn wait_started(&self, id: u64) {
        let started = self
            .started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job never started");
        assert_eq!(started, JobId(id));
    }

    fn release(&self) {
        self.release_tx.send(()).unwrap();
    }
}

fn run_every_job_runs_exactly_once(workers: usize, jobs: u64) {
    let seen = Arc::new(Mutex::new(HashMap::new()));
    let dispatcher = {
        let seen = Arc::clone(&seen);
        Dispatcher::start(
            workers,
            handler_fn(move |_, job: Job<u64>| {
                *seen.lock().unwrap().entry(job.id()).or_insert(0_usize) += 1;
                Ok(())
            }),
        )
        .unwrap()
    };

    for id in 0..jobs {
        dispatcher.submit(Job::new(id, id * 2)).unwrap();
    }
    dispatcher.await_completion();

    assert_eq!(dispatcher.outstanding(), 0);
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len() as u64, jobs);
        assert!(seen.values().all(|&count| count == 1));
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, jobs);
    assert_eq!(stats.completed, jobs);
    assert_eq!(stats.failed, 0);
    assert!(stats.claims <= stats.advertisements);

    dispatcher.shutdown();
    let reports = dispatcher.join();
    assert_eq!(reports.len(), workers);
    assert_eq!(reports.iter().map(|r| r.jobs_processed).sum::<u64>(), jobs);
}

#[test]
fn every_job_runs_exactly_once_single_worker() {
    run_every_job_runs_exactly_once(1, 0);
    run_every_job_runs_exactly_once(1, 1);
    run_every_job_runs_exactly_once(1, 25);
}

#[test]
fn every_job_runs_exactly_once_many_workers() {
    run_every_job_runs_exactly_once(2, 0);
    run_every_job_runs_exactly_once(3, 10);
    run_every_job_runs_exactly_once(8, 500);
}

#[test]
fn three_workers_process_ten_chores() {
    let done = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = {
        let done = Arc::clone(&done);
        Dispatcher::start(
            3,
            handler_fn(move |worker, job: Job<&'static str>| {
                thread::sleep(Duration::from_millis(5));
                done.lock().unwrap().push((worker, job.id(), *job.payload()));
                Ok(())
            }),
        )
        .unwrap()
    };

    for (i, chore) in CHORES.iter().enumerate() {
        dispatcher.submit(Job::new(i as u64 + 1, *chore)).unwrap();
    }
    dispatcher.await_completion();
    dispatcher.shutdown();
    dispatcher.join();

    let done = done.lock().unwrap();
    assert_eq!(done.len(), 10);

    let ids: HashSet<_> = done.iter().map(|(_, id, _)| id.0).collect();
    assert_eq!(ids, (1..=10).collect::<HashSet<_>>());
    assert!(done.iter().all(|(worker, _, _)| worker.index() < 3));
    for (_, id, chore) in done.iter() {
        assert_eq!(*chore, CHORES[id.0 as usize - 1]);
    }
}

#[test]
fn processing_never_exceeds_worker_count() {
    const WORKERS: usize = 3;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let dispatcher = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        Dispatcher::start(
            WORKERS,
            handler_fn(move |_, _: Job<()>| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap()
    };

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let stats = dispatcher.stats();
                assert!(stats.processing <= WORKERS);
                assert!(stats.idle <= WORKERS);
                thread::yield_now();
            }
        });

        for id in 0..60 {
            dispatcher.submit(Job::new(id, ())).unwrap();
        }
        dispatcher.await_completion();
        done.store(true, Ordering::SeqCst);
    });

    assert!(peak.load(Ordering::SeqCst) <= WORKERS);
}

#[test]
fn concurrent_submitters_never_double_claim() {
    const WORKERS: usize = 4;
    const SUBMITTERS: u64 = 8;
    const PER_SUBMITTER: u64 = 50;

    let seen = Arc::new(Mutex::new(HashMap::new()));
    let dispatcher = {
        let seen = Arc::clone(&seen);
        Dispatcher::start(
            WORKERS,
            handler_fn(move |worker, job: Job<u64>| {
                let previous = seen.lock().unwrap().insert(job.id(), worker);
                assert!(previous.is_none(), "job {} delivered twice", job.id());
                Ok(())
            }),
        )
        .unwrap()
    };

    thread::scope(|s| {
        for submitter in 0..SUBMITTERS {
            let dispatcher = &dispatcher;
            s.spawn(move || {
                for n in 0..PER_SUBMITTER {
                    let id = submitter * PER_SUBMITTER + n;
                    dispatcher.submit(Job::new(id, submitter)).unwrap();
                }
            });
        }
    });
    dispatcher.await_completion();

    let total = SUBMITTERS * PER_SUBMITTER;
    assert_eq!(seen.lock().unwrap().len() as u64, total);

    let stats = dispatcher.stats();
    assert_eq!(stats.claims, total);
    assert!(stats.claims <= stats.advertisements);
    assert_eq!(stats.submitted, total);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.completed, total);
}

#[test]
fn single_worker_serializes_handoffs() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let gate = Gate::new();
    let dispatcher = {
        let events = Arc::clone(&events);
        let started_tx = gate.started_tx.clone();
        let release_rx = gate.release_rx.clone();
        Dispatcher::start(
            1,
            handler_fn(move |_, job: Job<()>| {
                events.lock().unwrap().push(format!("start {}", job.id()));
                started_tx.send(job.id()).unwrap();
                if job.id() == JobId(1) {
                    release_rx.recv().unwrap();
                }
                events.lock().unwrap().push(format!("end {}", job.id()));
                Ok(())
            }),
        )
        .unwrap()
    };

    dispatcher.submit(Job::new(1, ())).unwrap();
    gate.wait_started(1);
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Processing]);

    let second_handed_off = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            dispatcher.submit(Job::new(2, ())).unwrap();
            second_handed_off.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(
            !second_handed_off.load(Ordering::SeqCst),
            "second job was handed off while the only worker was busy"
        );
        assert_eq!(dispatcher.outstanding(), 2);

        gate.release();
    });

    assert!(second_handed_off.load(Ordering::SeqCst));
    dispatcher.await_completion();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start 1", "end 1", "start 2", "end 2"]
    );
}

#[test]
fn shutdown_without_jobs_stops_every_worker() {
    let called = Arc::new(AtomicBool::new(false));
    let dispatcher = {
        let called = Arc::clone(&called);
        Dispatcher::start(
            4,
            handler_fn(move |_, _: Job<()>| {
                called.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap()
    };

    dispatcher.shutdown();
    let reports = dispatcher.join();

    assert_eq!(reports.len(), 4);
    let ids: Vec<_> = reports.iter().map(|r| r.worker_id).collect();
    assert_eq!(ids, (0..4).map(WorkerId).collect::<Vec<_>>());
    assert!(reports.iter().all(|r| r.jobs_processed == 0));
    assert!(
        dispatcher
            .worker_states()
            .iter()
            .all(|state| *state == WorkerState::Stopped)
    );
    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(dispatcher.stats().completed, 0);
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let dispatcher = Dispatcher::start(2, handler_fn(|_, _: Job<u64>| Ok(()))).unwrap();
    dispatcher.submit(Job::new(1, 1)).unwrap();
    dispatcher.await_completion();

    dispatcher.shutdown();
    assert!(dispatcher.is_closed());

    assert!(matches!(
        dispatcher.submit(Job::new(2, 2)),
        Err(Error::DispatcherClosed)
    ));
    assert!(matches!(
        dispatcher.submit_timeout(Job::new(3, 3), Duration::from_millis(10)),
        Err(Error::DispatcherClosed)
    ));

    assert_eq!(dispatcher.outstanding(), 0);
    let stats = dispatcher.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn start_rejects_invalid_configuration() {
    let zero = Dispatcher::start(0, handler_fn(|_, _: Job<u64>| Ok(())));
    assert!(matches!(zero, Err(Error::InvalidConfiguration { .. })));

    let unnamed = Dispatcher::with_config(
        DispatcherConfig::new(2).thread_name(""),
        handler_fn(|_, _: Job<u64>| Ok(())),
    );
    assert!(matches!(unnamed, Err(Error::InvalidConfiguration { .. })));
}

#[test]
fn worker_threads_use_configured_name() {
    let names = Arc::new(Mutex::new(HashSet::new()));
    let dispatcher = {
        let names = Arc::clone(&names);
        Dispatcher::with_config(
            DispatcherConfig::new(2).thread_name("chores"),
            handler_fn(move |_, _: Job<()>| {
                let name = thread::current().name().map(str::to_owned);
                names.lock().unwrap().insert(name);
                Ok(())
            }),
        )
        .unwrap()
    };

    for id in 0..20 {
        dispatcher.submit(Job::new(id, ())).unwrap();
    }
    dispatcher.await_completion();

    let names = names.lock().unwrap();
    assert!(!names.is_empty());
    for name in names.iter() {
        let name = name.as_deref().unwrap();
        assert!(name == "chores-0" || name == "chores-1", "unexpected {name}");
    }
}

#[test]
fn task_failures_are_reported_and_do_not_wedge_the_pool() {
    let (failures_tx, failures_rx) = unbounded();
    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::new(1).failure_sink(failures_tx),
        handler_fn(|_, job: Job<u64>| match *job.payload() {
            2 => Err("bad payload".into()),
            4 => panic!("job exploded"),
            _ => Ok(()),
        }),
    )
    .unwrap();

    for id in 1..=6 {
        dispatcher.submit(Job::new(id, id)).unwrap();
    }
    dispatcher.await_completion();

    assert_eq!(dispatcher.outstanding(), 0);
    let stats = dispatcher.stats();
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.failed, 2);

    let failures: Vec<_> = failures_rx.try_iter().collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].job_id, JobId(2));
    assert_eq!(failures[0].worker_id, WorkerId(0));
    assert_eq!(failures[0].kind, FailureKind::Failed("bad payload".into()));
    assert_eq!(failures[1].job_id, JobId(4));
    assert_eq!(failures[1].kind, FailureKind::Panicked("job exploded".into()));

    // The lone worker survived both failures.
    dispatcher.submit(Job::new(7, 7)).unwrap();
    dispatcher.await_completion();
    dispatcher.shutdown();
    let reports = dispatcher.join();
    assert_eq!(reports[0].jobs_processed, 7);
}

/// An error whose `Display` impl panics.
#[derive(Debug)]
struct UnprintableError;

impl fmt::Display for UnprintableError {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        panic!("display exploded")
    }
}

impl std::error::Error for UnprintableError {}

/// An error that panics when dropped.
#[derive(Debug)]
struct ExplodingDropError;

impl fmt::Display for ExplodingDropError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup failed")
    }
}

impl std::error::Error for ExplodingDropError {}

impl Drop for ExplodingDropError {
    fn drop(&mut self) {
        panic!("drop exploded")
    }
}

#[test]
fn panicking_task_errors_do_not_lose_the_worker() {
    let (failures_tx, failures_rx) = unbounded();
    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::new(1).failure_sink(failures_tx),
        handler_fn(|_, job: Job<u64>| match *job.payload() {
            1 => Err(UnprintableError.into()),
            2 => Err(ExplodingDropError.into()),
            _ => Ok(()),
        }),
    )
    .unwrap();

    dispatcher.submit(Job::new(1, 1)).unwrap();
    dispatcher
        .submit_timeout(Job::new(2, 2), Duration::from_secs(5))
        .unwrap();
    dispatcher
        .submit_timeout(Job::new(3, 3), Duration::from_secs(5))
        .unwrap();
    dispatcher.await_completion();

    assert_ne!(dispatcher.worker_states(), vec![WorkerState::Stopped]);
    let stats = dispatcher.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 2);

    let kinds: Vec<_> = failures_rx.try_iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![
            FailureKind::Panicked("display exploded".into()),
            FailureKind::Panicked("drop exploded".into()),
        ]
    );

    dispatcher.shutdown();
    let reports = dispatcher.join();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].jobs_processed, 3);
    assert_eq!(reports[0].exit, WorkerExit::Stopped);
}

#[test]
fn join_reports_worker_thread_that_unwound() {
    let dispatcher = Dispatcher::start(1, handler_fn(|_, _: Job<()>| Ok(()))).unwrap();
    dispatcher.submit(Job::new(1, ())).unwrap();
    dispatcher.await_completion();
    dispatcher.shutdown();

    // Swap the real thread for one that dies outside of any task.
    let healthy = dispatcher.handles.lock().pop().unwrap();
    assert_eq!(healthy.join().unwrap().exit, WorkerExit::Stopped);
    dispatcher
        .handles
        .lock()
        .push(thread::spawn(|| -> WorkerReport {
            panic!("worker state corrupted")
        }));

    let reports = dispatcher.join();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].worker_id, WorkerId(0));
    assert_eq!(reports[0].jobs_processed, 1);
    assert_eq!(
        reports[0].exit,
        WorkerExit::Panicked("worker state corrupted".into())
    );
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Stopped]);
}

#[test]
fn full_failure_sink_never_blocks_workers() {
    let (failures_tx, failures_rx) = bounded(1);
    let dispatcher = Dispatcher::with_config(
        DispatcherConfig::new(2).failure_sink(failures_tx),
        handler_fn(|_, _: Job<u64>| Err("always fails".into())),
    )
    .unwrap();

    for id in 0..50 {
        dispatcher.submit(Job::new(id, id)).unwrap();
    }
    dispatcher.await_completion();

    assert_eq!(failures_rx.len(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.completed, 50);
    assert_eq!(stats.failed, 50);

    // A sink whose receiver is gone is ignored as well.
    drop(failures_rx);
    for id in 50..55 {
        dispatcher.submit(Job::new(id, id)).unwrap();
    }
    dispatcher.await_completion();
    assert_eq!(dispatcher.stats().failed, 55);
}

#[test]
fn failures_without_a_sink_are_only_counted() {
    let dispatcher =
        Dispatcher::start(2, handler_fn(|_, _: Job<u64>| Err("always fails".into()))).unwrap();

    for id in 0..1000 {
        dispatcher.submit(Job::new(id, id)).unwrap();
    }
    dispatcher.await_completion();

    let stats = dispatcher.stats();
    assert_eq!(stats.failed, 1000);
    assert_eq!(stats.outstanding, 0);

    dispatcher.shutdown();
    let processed: u64 = dispatcher.join().iter().map(|r| r.jobs_processed).sum();
    assert_eq!(processed, 1000);
}

#[test]
fn handoff_to_stopped_worker_restores_the_counter() {
    let dispatcher = Dispatcher::start(1, handler_fn(|_, _: Job<u64>| Ok(()))).unwrap();

    while dispatcher.shared.pool.idle() == 0 {
        thread::yield_now();
    }
    let slot = dispatcher.shared.pool.claim().unwrap();

    // Stop the claimed worker before anything is handed to it.
    dispatcher.stop_signals[0].try_send(()).unwrap();
    let report = dispatcher.handles.lock().pop().unwrap().join().unwrap();
    assert_eq!(report.jobs_processed, 0);

    dispatcher.shared.counter.add();
    let result = dispatcher.hand_off(slot, Job::new(1, 1));

    assert!(matches!(result, Err(Error::DispatcherClosed)));
    assert_eq!(dispatcher.outstanding(), 0);
    assert_eq!(dispatcher.stats().submitted, 0);
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Stopped]);
}

#[test]
fn submit_timeout_expires_while_workers_are_busy() {
    let gate = Gate::new();
    let completed = Arc::new(AtomicU64::new(0));
    let dispatcher = gate.start_dispatcher(1, 1, Arc::clone(&completed));

    dispatcher.submit(Job::new(1, 1)).unwrap();
    gate.wait_started(1);

    let result = dispatcher.submit_timeout(Job::new(2, 2), Duration::from_millis(30));
    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(dispatcher.outstanding(), 1);

    gate.release();
    dispatcher
        .submit_timeout(Job::new(3, 3), Duration::from_secs(5))
        .unwrap();
    dispatcher.await_completion();

    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.stats().submitted, 2);
}

#[test]
fn await_completion_timeout_reports_pending_work() {
    let gate = Gate::new();
    let completed = Arc::new(AtomicU64::new(0));
    let dispatcher = gate.start_dispatcher(2, 1, Arc::clone(&completed));

    dispatcher.submit(Job::new(1, 1)).unwrap();
    gate.wait_started(1);

    assert!(!dispatcher.await_completion_timeout(Duration::from_millis(20)));

    gate.release();
    assert!(dispatcher.await_completion_timeout(Duration::from_secs(5)));
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_lets_in_flight_job_finish() {
    let gate = Gate::new();
    let completed = Arc::new(AtomicU64::new(0));
    let dispatcher = gate.start_dispatcher(1, 1, Arc::clone(&completed));

    dispatcher.submit(Job::new(1, 1)).unwrap();
    gate.wait_started(1);

    dispatcher.shutdown();
    assert!(matches!(
        dispatcher.submit(Job::new(2, 2)),
        Err(Error::DispatcherClosed)
    ));
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Processing]);

    gate.release();
    let reports = dispatcher.join();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].jobs_processed, 1);
    assert_eq!(dispatcher.outstanding(), 0);
    assert_eq!(dispatcher.worker_states(), vec![WorkerState::Stopped]);
}

#[test]
fn shutdown_releases_blocked_submitters() {
    let gate = Gate::new();
    let completed = Arc::new(AtomicU64::new(0));
    let dispatcher = gate.start_dispatcher(1, 1, Arc::clone(&completed));

    dispatcher.submit(Job::new(1, 1)).unwrap();
    gate.wait_started(1);

    thread::scope(|s| {
        let blocked = s.spawn(|| dispatcher.submit(Job::new(2, 2)));

        thread::sleep(Duration::from_millis(20));
        dispatcher.shutdown();

        assert!(matches!(
            blocked.join().unwrap(),
            Err(Error::DispatcherClosed)
        ));
    });

    gate.release();
    dispatcher.join();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.outstanding(), 0);
}

#[test]
fn shutdown_and_join_are_idempotent() {
    let dispatcher = Dispatcher::start(3, handler_fn(|_, _: Job<()>| Ok(()))).unwrap();

    dispatcher.shutdown();
    dispatcher.shutdown();

    assert_eq!(dispatcher.join().len(), 3);
    assert!(dispatcher.join().is_empty());
}

#[test]
fn drop_finishes_handed_off_jobs() {
    const JOBS: u64 = 40;

    let completed = Arc::new(AtomicU64::new(0));
    {
        let counter = Arc::clone(&completed);
        let dispatcher = Dispatcher::start(
            4,
            handler_fn(move |_, _: Job<()>| {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        for id in 0..JOBS {
            dispatcher.submit(Job::new(id, ())).unwrap();
        }
    }

    assert_eq!(completed.load(Ordering::SeqCst), JOBS);
}
