// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The write-ahead buffer ("Limbo"): an append-only, in-memory, newest-first
//! ordered log of [`Write`]s and the authoritative newest revision for a
//! record until its writes are transferred into a segment (spec §4.1).

use crate::{
    action::Action,
    atoms::{PrimaryKey, Text, Value},
    error::{Error, Result},
    fs::FileSystem,
    segment::Segment,
    version_counter::VersionCounter,
    write::Write,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Condvar, Mutex,
};

/// Default backpressure threshold; overridable via
/// [`crate::config::KernelConfig`].
pub const DEFAULT_HIGH_WATER_MARK: usize = 100_000;

struct State {
    entries: Vec<Write>,
}

/// The in-memory write-ahead log fronting the segment list.
pub struct Buffer {
    state: Mutex<State>,
    not_full: Condvar,
    high_water_mark: usize,
    versions: VersionCounter,
    sealed: AtomicBool,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK)
    }
}

impl Buffer {
    /// Creates an empty buffer that backpressures `insert` once it holds
    /// `high_water_mark` writes.
    #[must_use]
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            state: Mutex::new(State { entries: Vec::new() }),
            not_full: Condvar::new(),
            high_water_mark,
            versions: VersionCounter::new(1),
            sealed: AtomicBool::new(false),
        }
    }

    /// Whether a fatal `transfer` failure has sealed the buffer read-only.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Number of writes currently buffered.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("buffer lock poisoned").entries.len()
    }

    /// Whether the buffer holds no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `write`, blocking while the buffer is at its high-water-mark
    /// (spec §4.1 backpressure). Assigns a version when `write.version()` is
    /// the sentinel `0`; a caller-supplied nonzero version is kept as-is,
    /// which is how replayed/deserialized writes preserve their original
    /// ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if the buffer has been sealed by
    /// a prior fatal `transfer` failure.
    #[allow(clippy::expect_used)]
    pub fn insert(&self, write: Write) -> Result<u64> {
        if self.is_sealed() {
            return Err(Error::IllegalTransition("buffer is sealed"));
        }

        let mut state = self.state.lock().expect("buffer lock poisoned");
        while state.entries.len() >= self.high_water_mark {
            if self.is_sealed() {
                return Err(Error::IllegalTransition("buffer is sealed"));
            }
            state = self.not_full.wait(state).expect("buffer lock poisoned");
        }

        let version = if write.version() == 0 {
            self.versions.next()
        } else {
            write.version()
        };
        let write = if version == write.version() {
            write
        } else {
            Write::new(
                write.key().clone(),
                write.value().clone(),
                write.record(),
                write.action(),
                write.timestamp(),
                version,
            )
        };

        state.entries.push(write);
        Ok(version)
    }

    /// Returns `true` if the most recent write matching `(key, value,
    /// record)` at or before `timestamp` (defaulting to "now", i.e. no
    /// bound) is an `Action::Add`; `false` if it is a `Remove` or no such
    /// write exists (spec §4.1 `verify`).
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[must_use]
    pub fn verify(&self, key: &Text, value: &Value, record: PrimaryKey, timestamp: Option<u64>) -> bool {
        self.last_write_action(key, value, record, timestamp) == Some(Action::Add)
    }

    /// Returns the action of the most recent write matching `(key, value,
    /// record)` with `version <= timestamp` (or unbounded if `timestamp` is
    /// `None`), walking newest-first (spec §4.1 `getLastWriteAction`).
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[must_use]
    pub fn last_write_action(
        &self,
        key: &Text,
        value: &Value,
        record: PrimaryKey,
        timestamp: Option<u64>,
    ) -> Option<Action> {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("buffer lock poisoned");
        state
            .entries
            .iter()
            .rev()
            .find(|w| w.matches(key, value, record) && timestamp.is_none_or(|ts| w.version() <= ts))
            .map(Write::action)
    }

    /// A newest-first snapshot of every buffered write (spec §4.1
    /// `iterate`). The snapshot is taken at call time; it does not reflect
    /// subsequent inserts (this is the "not restartable once closed" half of
    /// the contract — the iterator is over a fixed, already-closed view).
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[must_use]
    pub fn iterate(&self) -> impl Iterator<Item = Write> {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("buffer lock poisoned");
        let mut snapshot = state.entries.clone();
        snapshot.reverse();
        snapshot.into_iter()
    }

    /// Drains every buffered write, in original insertion order, into
    /// `segment`'s chunks via [`Segment::acquire`] (spec §4.1 `transfer`).
    ///
    /// On an I/O failure the already-acquired writes stay drained but the
    /// remaining tail is pushed back onto the buffer and the buffer is left
    /// open (spec §7: "fatal to that transfer only; the Buffer retains the
    /// un-transferred tail"). Any other failure indicates a broken
    /// invariant (e.g. the segment was already sealed); the buffer seals
    /// itself read-only and the error is returned verbatim.
    ///
    /// # Errors
    ///
    /// Propagates whatever `segment.acquire` returns for the failing write.
    #[allow(clippy::expect_used)]
    pub fn transfer<FS: FileSystem>(&self, segment: &mut Segment<FS>) -> Result<usize> {
        if self.is_sealed() {
            return Err(Error::IllegalTransition("buffer is sealed"));
        }

        let mut state = self.state.lock().expect("buffer lock poisoned");
        let drained = std::mem::take(&mut state.entries);

        for (acquired, write) in drained.iter().enumerate() {
            if let Err(error) = segment.acquire(write) {
                match error {
                    Error::Io(_) => {
                        state.entries.extend(drained[acquired..].iter().cloned());
                        drop(state);
                        self.not_full.notify_all();
                        return Err(error);
                    }
                    other => {
                        self.sealed.store(true, Ordering::Release);
                        drop(state);
                        return Err(other);
                    }
                }
            }
        }

        let count = drained.len();
        drop(state);
        self.not_full.notify_all();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::Text as KernelText;
    use crate::fs::StdFileSystem;
    use test_log::test;

    fn write(key: &str, value: &str, record: u64, action: Action) -> Write {
        Write::new(KernelText::new(key), Value::String(KernelText::new(value)), PrimaryKey::new(record), action, 0, 0)
    }

    /// Spec E1.
    #[test]
    fn add_then_remove_flips_verify() {
        let buffer = Buffer::default();
        buffer.insert(write("name", "jeff", 1, Action::Add)).unwrap();
        assert!(buffer.verify(&KernelText::new("name"), &Value::String(KernelText::new("jeff")), PrimaryKey::new(1), None));

        buffer.insert(write("name", "jeff", 1, Action::Remove)).unwrap();
        assert!(!buffer.verify(&KernelText::new("name"), &Value::String(KernelText::new("jeff")), PrimaryKey::new(1), None));
    }

    #[test]
    fn insert_assigns_monotonic_versions_when_unset() {
        let buffer = Buffer::default();
        let a = buffer.insert(write("a", "1", 1, Action::Add)).unwrap();
        let b = buffer.insert(write("b", "2", 2, Action::Add)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn insert_backpressures_at_high_water_mark() {
        let buffer = std::sync::Arc::new(Buffer::new(1));
        buffer.insert(write("a", "1", 1, Action::Add)).unwrap();

        let blocked = std::sync::Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            blocked.insert(write("b", "2", 2, Action::Add)).unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(buffer.len(), 1);

        let mut segment: Segment<StdFileSystem> = Segment::create(1);
        buffer.transfer(&mut segment).unwrap();

        handle.join().unwrap();
        assert_eq!(buffer.len(), 1);
    }

    /// Spec E2 (partial; full scenario lives under tests/).
    #[test]
    fn transfer_drains_in_insertion_order_and_empties_the_buffer() {
        let buffer = Buffer::default();
        for i in 0..5u64 {
            buffer.insert(write("k", "v", i, Action::Add)).unwrap();
        }

        let mut segment: Segment<StdFileSystem> = Segment::create(1);
        let count = buffer.transfer(&mut segment).unwrap();
        assert_eq!(count, 5);
        assert!(buffer.is_empty());

        let writes = segment.writes().unwrap();
        assert_eq!(writes.len(), 5);
        for (i, w) in writes.iter().enumerate() {
            assert_eq!(w.record(), PrimaryKey::new(i as u64));
        }
    }

    #[test]
    fn iterate_snapshots_newest_first() {
        let buffer = Buffer::default();
        buffer.insert(write("a", "1", 1, Action::Add)).unwrap();
        buffer.insert(write("b", "2", 2, Action::Add)).unwrap();

        let snapshot: Vec<Write> = buffer.iterate().collect();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].record(), PrimaryKey::new(2));
        assert_eq!(snapshot[1].record(), PrimaryKey::new(1));
    }
}
