// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The live list of immutable segments, shared between readers and the
//! compactor (spec §4.6, §4.7, §4.9).
//!
//! Readers take a cheap [`SharedLock::read`] guard just long enough to
//! clone the `Arc<Segment>` list out; the compactor takes the write side
//! only for the instant it swaps a merged pair in. An evicted segment's
//! `Arc` keeps it alive for exactly as long as some reader's snapshot still
//! references it — spec §9's "a simple epoch counter suffices" for garbage
//! collection, implemented here as ordinary reference counting instead of
//! an explicit counter.

use crate::{error::Result, fs::FileSystem, segment::Segment, shared_lock::SharedLock};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// A shared, lock-protected list of sealed segments plus the id counter
/// new segments are minted from.
pub struct SegmentList<FS: FileSystem> {
    lock: SharedLock,
    segments: Mutex<Vec<Arc<Segment<FS>>>>,
    garbage: Mutex<Vec<Arc<Segment<FS>>>>,
    next_id: AtomicU64,
}

impl<FS: FileSystem> Default for SegmentList<FS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<FS: FileSystem> SegmentList<FS> {
    /// Starts an empty list; the first id it hands out is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: SharedLock::new(),
            segments: Mutex::new(Vec::new()),
            garbage: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seeds the id counter so the next id minted is `highest + 1`. Used
    /// when reopening a database directory that already holds segments.
    pub fn seed_next_id(&self, highest: u64) {
        self.next_id.fetch_max(highest + 1, Ordering::AcqRel);
    }

    /// Mints the next segment id.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    /// A cheap point-in-time snapshot of every live segment, newest last.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Segment<FS>>> {
        let _guard = self.lock.read();
        self.segments.lock().expect("segment list lock poisoned").clone()
    }

    /// Number of live segments.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn len(&self) -> usize {
        let _guard = self.lock.read();
        self.segments.lock().expect("segment list lock poisoned").len()
    }

    /// Whether the list holds no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a newly sealed segment.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    pub fn push(&self, segment: Segment<FS>) {
        let _guard = self.lock.write();
        self.segments
            .lock()
            .expect("segment list lock poisoned")
            .push(Arc::new(segment));
    }

    /// Atomically replaces the adjacent pair at `(aindex, bindex)` with
    /// `merged`. Returns `false` without modifying the list if the indices
    /// are no longer adjacent or in range, which can happen if another
    /// round already compacted past them.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used, clippy::indexing_slicing)]
    pub fn swap_pair(&self, aindex: usize, bindex: usize, merged: Segment<FS>) -> bool {
        let _guard = self.lock.write();
        let mut segments = self.segments.lock().expect("segment list lock poisoned");

        if bindex != aindex + 1 || bindex >= segments.len() {
            return false;
        }

        let evicted_b = segments.remove(bindex);
        let evicted_a = std::mem::replace(&mut segments[aindex], Arc::new(merged));
        drop(segments);

        #[allow(clippy::expect_used)]
        self.garbage
            .lock()
            .expect("garbage list lock poisoned")
            .extend([evicted_a, evicted_b]);
        true
    }

    /// Unlinks the backing file of every evicted segment no reader still
    /// holds a snapshot referencing (`Arc::strong_count() == 1`). Segments
    /// still referenced are left for the next call.
    ///
    /// # Errors
    ///
    /// Propagates an I/O error from removing a segment file.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    pub fn collect_garbage(&self) -> Result<()> {
        let mut garbage = self.garbage.lock().expect("garbage list lock poisoned");
        let mut still_referenced = Vec::new();

        for segment in garbage.drain(..) {
            if Arc::strong_count(&segment) > 1 {
                still_referenced.push(segment);
                continue;
            }
            if let Some(path) = segment.path() {
                if FS::exists(path)? {
                    FS::remove_file(path)?;
                }
            }
        }

        *garbage = still_referenced;
        Ok(())
    }

    /// Number of segments awaiting garbage collection.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn garbage_len(&self) -> usize {
        self.garbage.lock().expect("garbage list lock poisoned").len()
    }
}
