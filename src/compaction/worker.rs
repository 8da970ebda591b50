// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The background compactor thread (spec §4.7).
//!
//! Each round parks until enough segments exist, consults the policy,
//! merges an adjacent pair it picks by walking a cursor across the list,
//! and advances the cursor's shift index/count for next time (spec §4.7
//! steps 1-7; see [`super::advance_shift_index`] for the bookkeeping rule).

use super::{CompactionPolicy, StorageContext};
use crate::{fs::FileSystem, segment_list::SegmentList, stop_signal::StopSignal};
use std::{
    any::Any,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex},
    thread::JoinHandle,
    time::Duration,
};

/// Facts the compactor needs from whatever owns the database directory:
/// disk-space accounting and where a freshly merged segment's file belongs
/// (spec §4.7 steps 1, 6).
pub trait CompactionProvider<FS: FileSystem>: Send + Sync {
    /// Current disk-space facts.
    fn context(&self) -> StorageContext;

    /// The path a segment with this id should be sealed to.
    fn segment_path(&self, id: u64) -> PathBuf;
}

/// Wakes the compactor when a segment is added, rather than leaving it to
/// busy-poll (spec §4.7 step 1: "park on signal"; spec §9 resolves the
/// signal's semantics as park/wake via a condition variable).
#[derive(Clone, Default)]
pub struct CompactionSignal(Arc<(Mutex<bool>, Condvar)>);

impl CompactionSignal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes any thread parked in [`CompactionSignal::park`].
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    pub fn notify(&self) {
        let (lock, condvar) = &*self.0;
        let mut ready = lock.lock().expect("signal lock poisoned");
        *ready = true;
        condvar.notify_all();
    }

    /// Blocks until notified or `timeout` elapses, whichever comes first.
    ///
    /// # Panics
    ///
    /// If the internal lock is poisoned by a panicking thread.
    #[allow(clippy::expect_used)]
    pub fn park(&self, timeout: Duration) {
        let (lock, condvar) = &*self.0;
        let mut ready = lock.lock().expect("signal lock poisoned");
        if *ready {
            *ready = false;
            return;
        }
        let (mut ready, _timed_out) = condvar.wait_timeout(ready, timeout).expect("signal lock poisoned");
        *ready = false;
    }
}

/// Walks an adjacent pair across the segment list, advancing by one
/// position each round and wrapping shift count at the end (spec §4.7
/// step 7).
#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    shift_index: usize,
    shift_count: u64,
}

impl Cursor {
    fn advance(&mut self, segment_count: usize) {
        let width = segment_count.saturating_sub(1).max(1);
        let (next, wrapped) = super::advance_shift_index(self.shift_index, width);
        self.shift_index = next;
        if wrapped {
            self.shift_count += 1;
        }
    }
}

/// Extracts a printable message from a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Drives one segment list's compaction rounds on a dedicated thread.
pub struct CompactionWorker<FS: FileSystem + 'static> {
    segments: Arc<SegmentList<FS>>,
    policy: Arc<dyn CompactionPolicy<FS>>,
    provider: Arc<dyn CompactionProvider<FS>>,
    signal: CompactionSignal,
    stop: StopSignal,
    min_segments: usize,
    park_interval: Duration,
}

impl<FS: FileSystem + 'static> CompactionWorker<FS> {
    /// Builds a worker over `segments`, driven by `policy` and `provider`.
    #[must_use]
    pub fn new(
        segments: Arc<SegmentList<FS>>,
        policy: Arc<dyn CompactionPolicy<FS>>,
        provider: Arc<dyn CompactionProvider<FS>>,
        signal: CompactionSignal,
        stop: StopSignal,
        min_segments: usize,
    ) -> Self {
        Self {
            segments,
            policy,
            provider,
            signal,
            stop,
            min_segments,
            park_interval: Duration::from_millis(200),
        }
    }

    /// Spawns the compactor on a dedicated, named OS thread.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("concourse-compactor".to_owned())
            .spawn(move || self.run())
            .expect("failed to spawn compaction thread")
    }

    /// Runs rounds until stopped. A panic inside a round is caught, logged
    /// at the fatal level, and halts this thread; it is not propagated, so
    /// a caller must notice via `StopSignal`/liveness checks elsewhere.
    fn run(&self) {
        let mut cursor = Cursor::default();
        while !self.stop.is_stopped() {
            let worker = std::panic::AssertUnwindSafe(|| self.round(&mut cursor));
            if let Err(payload) = std::panic::catch_unwind(worker) {
                log::error!("compactor worker STOPPED WORKING: {}", panic_message(&*payload));
                return;
            }
        }
    }

    /// One compaction round (spec §4.7 steps 1-7).
    fn round(&self, cursor: &mut Cursor) {
        let segments = self.segments.snapshot();
        if segments.len() < self.min_segments.max(2) {
            self.signal.park(self.park_interval);
            return;
        }

        let context = self.provider.context();
        if !self.policy.is_triggered(&context) {
            self.signal.park(self.park_interval);
            return;
        }

        let aindex = cursor.shift_index;
        let bindex = aindex + 1;
        cursor.advance(segments.len());

        let Some(a) = segments.get(aindex) else {
            return;
        };
        let Some(b) = segments.get(bindex) else {
            return;
        };

        if !self.policy.is_optimization_possible(&context, a, b) {
            log::trace!("compaction choice: skip segments {} and {}", a.id(), b.id());
            return;
        }

        self.compact_pair(aindex, bindex, a, b);
    }

    /// Merges the pair at `(aindex, bindex)`, seals the result, and swaps
    /// it into the segment list.
    fn compact_pair(&self, aindex: usize, bindex: usize, a: &crate::segment::Segment<FS>, b: &crate::segment::Segment<FS>) {
        let next_id = self.segments.next_id();
        let merged = match self.policy.compact(a, b, next_id) {
            Ok(Some(merged)) => merged,
            Ok(None) => return,
            Err(error) => {
                log::warn!("compaction of segments {} and {} aborted: {error}", a.id(), b.id());
                return;
            }
        };

        let path = self.provider.segment_path(next_id);
        let mut merged = merged;
        if let Err(error) = merged.transfer(&path) {
            log::warn!("failed to seal compacted segment {next_id}: {error}");
            return;
        }

        if self.segments.swap_pair(aindex, bindex, merged) {
            log::debug!("compacted segments {} and {} into {next_id}", a.id(), b.id());
            if let Err(error) = self.segments.collect_garbage() {
                log::warn!("garbage collection after compaction failed: {error}");
            }
        } else {
            log::trace!("compaction of segments {} and {} raced with another round", a.id(), b.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compaction::merge::MergeCompactor, fs::StdFileSystem, segment::Segment};
    use test_log::test;

    struct FixedProvider {
        dir: tempfile::TempDir,
        available_disk_space: u64,
    }

    impl CompactionProvider<StdFileSystem> for FixedProvider {
        fn context(&self) -> StorageContext {
            StorageContext {
                available_disk_space: self.available_disk_space,
                total_disk_space: self.available_disk_space,
                mutable_segments: 0,
            }
        }

        fn segment_path(&self, id: u64) -> PathBuf {
            self.dir.path().join(format!("{id}.seg"))
        }
    }

    fn worker(
        segments: Arc<SegmentList<StdFileSystem>>,
        provider: Arc<FixedProvider>,
    ) -> CompactionWorker<StdFileSystem> {
        CompactionWorker::new(
            segments,
            Arc::new(MergeCompactor),
            provider,
            CompactionSignal::new(),
            StopSignal::default(),
            2,
        )
    }

    #[test]
    fn round_merges_the_first_adjacent_pair_when_triggered() {
        let segments: Arc<SegmentList<StdFileSystem>> = Arc::new(SegmentList::new());
        segments.push(Segment::create(1));
        segments.push(Segment::create(2));
        let provider = Arc::new(FixedProvider {
            dir: tempfile::tempdir().unwrap(),
            available_disk_space: u64::MAX,
        });

        let worker = worker(Arc::clone(&segments), provider);
        let mut cursor = Cursor::default();
        worker.round(&mut cursor);

        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn round_parks_when_below_the_minimum_segment_count() {
        let segments: Arc<SegmentList<StdFileSystem>> = Arc::new(SegmentList::new());
        segments.push(Segment::create(1));
        let provider = Arc::new(FixedProvider {
            dir: tempfile::tempdir().unwrap(),
            available_disk_space: u64::MAX,
        });

        let mut worker = worker(Arc::clone(&segments), provider);
        worker.park_interval = Duration::from_millis(1);
        let mut cursor = Cursor::default();
        worker.round(&mut cursor);

        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn park_consumes_the_signal_instead_of_spinning_forever() {
        let signal = CompactionSignal::new();
        signal.notify();
        signal.park(Duration::from_millis(1));
        let started = std::time::Instant::now();
        signal.park(Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn cursor_wraps_the_shift_count_at_the_end_of_the_list() {
        let mut cursor = Cursor::default();
        cursor.advance(3);
        assert_eq!(cursor.shift_index, 1);
        assert_eq!(cursor.shift_count, 0);
        cursor.advance(3);
        assert_eq!(cursor.shift_index, 0);
        assert_eq!(cursor.shift_count, 1);
    }
}
