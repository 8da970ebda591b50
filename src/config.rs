// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Builder for the kernel's tunable knobs (spec §9 Design Notes; SPEC_FULL
//! §10.3), grounded on the teacher's `Config::new(path)` + chained-setter
//! pattern.

use crate::{
    path::absolute_path,
    schema_version::{SchemaVersion, CURRENT_SCHEMA_VERSION},
};
use std::path::{Path, PathBuf};

/// Default bloom filter target false-positive rate (spec §4.4: "target FPR
/// ≤ 3%").
pub const DEFAULT_BLOOM_FP_RATE: f32 = 0.03;

/// Default number of segments the compactor requires before it considers
/// triggering (spec §4.7 step 1: "If segment count < 3, park on signal").
pub const DEFAULT_COMPACTION_TRIGGER_MIN_SEGMENTS: usize = 3;

/// Default minimum free disk space the compactor requires before merging
/// (a merge temporarily needs room for both inputs and the output).
pub const DEFAULT_COMPACTION_MIN_DISK_HEADROOM_BYTES: u64 = 128 * 1_024 * 1_024;

/// Builder for the kernel's environment paths and tuning knobs.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Root directory the write-ahead buffer persists under, if at all.
    pub buffer_dir: PathBuf,

    /// Root directory segments are written under, as `<environment>/<id>.seg`.
    pub database_dir: PathBuf,

    /// Buffer backpressure threshold (spec §4.1).
    pub high_water_mark: usize,

    /// Target bloom filter false-positive rate (spec §4.4).
    pub bloom_fp_rate: f32,

    /// On-disk schema version new segments are written with (spec §6).
    pub schema_version: SchemaVersion,

    /// Minimum segment count before the compactor considers triggering
    /// (spec §4.7).
    pub compaction_trigger_min_segments: usize,

    /// Minimum free disk space, in bytes, the compactor requires before
    /// attempting a merge.
    pub compaction_min_disk_headroom_bytes: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            buffer_dir: absolute_path(Path::new(".concourse.buffer")),
            database_dir: absolute_path(Path::new(".concourse.db")),
            high_water_mark: crate::buffer::DEFAULT_HIGH_WATER_MARK,
            bloom_fp_rate: DEFAULT_BLOOM_FP_RATE,
            schema_version: CURRENT_SCHEMA_VERSION,
            compaction_trigger_min_segments: DEFAULT_COMPACTION_TRIGGER_MIN_SEGMENTS,
            compaction_min_disk_headroom_bytes: DEFAULT_COMPACTION_MIN_DISK_HEADROOM_BYTES,
        }
    }
}

impl KernelConfig {
    /// Starts a config rooted at `dir`: the buffer and database each get
    /// their own subdirectory underneath it.
    #[must_use]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = absolute_path(dir.as_ref());
        Self {
            buffer_dir: dir.join("buffer"),
            database_dir: dir.join("db"),
            ..Default::default()
        }
    }

    /// Overrides the buffer's root directory.
    #[must_use]
    pub fn buffer_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.buffer_dir = absolute_path(dir.as_ref());
        self
    }

    /// Overrides the database's root directory.
    #[must_use]
    pub fn database_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.database_dir = absolute_path(dir.as_ref());
        self
    }

    /// Sets the buffer backpressure threshold.
    ///
    /// # Panics
    ///
    /// Panics if `mark` is zero.
    #[must_use]
    pub fn high_water_mark(mut self, mark: usize) -> Self {
        assert!(mark > 0, "high-water-mark must be positive");
        self.high_water_mark = mark;
        self
    }

    /// Sets the target bloom filter false-positive rate.
    ///
    /// # Panics
    ///
    /// Panics if `fpr` is not in `(0.0, 1.0)`.
    #[must_use]
    pub fn bloom_fp_rate(mut self, fpr: f32) -> Self {
        assert!(fpr > 0.0 && fpr < 1.0, "false-positive rate must be in (0, 1)");
        self.bloom_fp_rate = fpr;
        self
    }

    /// Sets the minimum segment count before the compactor considers
    /// triggering.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2 (a merge needs at least two segments).
    #[must_use]
    pub fn compaction_trigger_min_segments(mut self, n: usize) -> Self {
        assert!(n >= 2, "need at least two segments to merge");
        self.compaction_trigger_min_segments = n;
        self
    }

    /// Sets the minimum free disk space, in bytes, required before the
    /// compactor attempts a merge.
    #[must_use]
    pub fn compaction_min_disk_headroom_bytes(mut self, bytes: u64) -> Self {
        self.compaction_min_disk_headroom_bytes = bytes;
        self
    }
}
