//! The shared registry of idle workers.
//!
//! Each idle worker publishes a [`Slot`] (its identity plus the sending half
//! of its private rendezvous channel). Submitters claim slots one at a time
//! and hand a job straight into the claimed worker's channel. Advertise, claim
//! and close all happen under one mutex, so a slot is removed by exactly one
//! claimer and no advertisement is lost without the worker being told.

use crate::job::WorkerId;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

/// An idle worker's "I am free" token.
pub(crate) struct Slot<T> {
    pub(crate) worker: WorkerId,
    pub(crate) handoff: Sender<T>,
}

/// Why a claim returned without a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimError {
    Closed,
    TimedOut,
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    closed: bool,
    advertisements: u64,
    claims: u64,
}

pub(crate) struct AdvertisementPool<T> {
    state: Mutex<PoolState<T>>,
    advertised: Condvar,
    capacity: usize,
}

impl<T> AdvertisementPool<T> {
    /// Creates an open pool holding at most `capacity` slots, one per worker.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(capacity),
                closed: false,
                advertisements: 0,
                claims: 0,
            }),
            advertised: Condvar::new(),
            capacity,
        }
    }

    /// Publishes `slot`, waking one blocked claimer.
    ///
    /// Returns the slot back if the pool has been closed; the worker must
    /// treat that as a stop signal.
    pub(crate) fn advertise(&self, slot: Slot<T>) -> Result<(), Slot<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(slot);
        }

        debug_assert!(state.idle.len() < self.capacity, "pool over capacity");
        debug_assert!(
            state.idle.iter().all(|s| s.worker != slot.worker),
            "worker {} advertised twice",
            slot.worker
        );

        state.idle.push_back(slot);
        state.advertisements += 1;
        drop(state);

        self.advertised.notify_one();
        Ok(())
    }

    /// Removes an idle slot, blocking until one is advertised.
    ///
    /// Returns `None` once the pool is closed.
    pub(crate) fn claim(&self) -> Option<Slot<T>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(slot) = state.idle.pop_front() {
                state.claims += 1;
                return Some(slot);
            }
            self.advertised.wait(&mut state);
        }
    }

    /// Like [`Self::claim`], but gives up at `deadline`.
    pub(crate) fn claim_until(&self, deadline: Instant) -> Result<Slot<T>, ClaimError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(ClaimError::Closed);
            }
            if let Some(slot) = state.idle.pop_front() {
                state.claims += 1;
                return Ok(slot);
            }
            if self.advertised.wait_until(&mut state, deadline).timed_out() {
                if state.closed {
                    return Err(ClaimError::Closed);
                }
                // An advertisement may have raced the timeout.
                return match state.idle.pop_front() {
                    Some(slot) => {
                        state.claims += 1;
                        Ok(slot)
                    }
                    None => Err(ClaimError::TimedOut),
                };
            }
        }
    }

    /// Closes the pool: pending and future claims fail, future
    /// advertisements are refused, and idle slots are discarded.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);

        self.advertised.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of currently advertised workers.
    pub(crate) fn idle(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Total advertisements and claims since creation.
    pub(crate) fn totals(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.advertisements, state.claims)
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }
}
