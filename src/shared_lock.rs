// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A reader/writer lock that admits either any number of readers or any
//! number of writers, but never a mix of both (spec §4.9, property P7).
//!
//! The segment list is read by every query and mutated by the compactor's
//! atomic swap; this lock lets concurrent readers proceed without blocking
//! each other while still giving the compactor exclusion from them during a
//! swap. Spec §9 notes that the two-sub-lock construction it sketches is
//! unusual and that "a single mutex plus two counters guarded by it" is an
//! acceptably simpler correct implementation; that's what this is.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

#[derive(Default)]
struct State {
    readers: u32,
    writers: u32,
}

/// A lock admitting either N readers or N writers concurrently, never both.
pub struct SharedLock {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until a reader slot is available, then returns a guard that
    /// releases it on drop.
    #[allow(clippy::expect_used)]
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().expect("shared lock poisoned");
        while state.writers > 0 {
            state = self.condvar.wait(state).expect("shared lock poisoned");
        }
        state.readers += 1;
        drop(state);
        ReadGuard { lock: self }
    }

    /// Blocks until a writer slot is available, then returns a guard that
    /// releases it on drop.
    #[allow(clippy::expect_used)]
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock().expect("shared lock poisoned");
        while state.readers > 0 {
            state = self.condvar.wait(state).expect("shared lock poisoned");
        }
        state.writers += 1;
        drop(state);
        WriteGuard { lock: self }
    }

    /// Like [`SharedLock::read`], but gives up and returns `None` once
    /// `timeout` has elapsed without acquiring a slot.
    #[allow(clippy::expect_used)]
    pub fn try_read_for(&self, timeout: Duration) -> Option<ReadGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("shared lock poisoned");
        while state.writers > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, timed_out) = self
                .condvar
                .wait_timeout(state, remaining)
                .expect("shared lock poisoned");
            state = guard;
            if timed_out.timed_out() && state.writers > 0 {
                return None;
            }
        }
        state.readers += 1;
        drop(state);
        Some(ReadGuard { lock: self })
    }

    /// Like [`SharedLock::write`], but gives up and returns `None` once
    /// `timeout` has elapsed without acquiring a slot.
    #[allow(clippy::expect_used)]
    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("shared lock poisoned");
        while state.readers > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, timed_out) = self
                .condvar
                .wait_timeout(state, remaining)
                .expect("shared lock poisoned");
            state = guard;
            if timed_out.timed_out() && state.readers > 0 {
                return None;
            }
        }
        state.writers += 1;
        drop(state);
        Some(WriteGuard { lock: self })
    }

    #[allow(clippy::expect_used)]
    fn release_read(&self) {
        let mut state = self.state.lock().expect("shared lock poisoned");
        state.readers -= 1;
        if state.readers == 0 {
            drop(state);
            self.condvar.notify_all();
        }
    }

    #[allow(clippy::expect_used)]
    fn release_write(&self) {
        let mut state = self.state.lock().expect("shared lock poisoned");
        state.writers -= 1;
        if state.writers == 0 {
            drop(state);
            self.condvar.notify_all();
        }
    }
}

/// A held reader slot. Dropping it releases the slot.
pub struct ReadGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// A held writer slot. Dropping it releases the slot.
pub struct WriteGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
