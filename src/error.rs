// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Checksum,
};

/// Represents errors that can occur in the storage kernel.
#[derive(Debug)]
pub enum Error {
    /// I/O error.
    Io(std::io::Error),

    /// Serialization failed.
    Encode(EncodeError),

    /// Deserialization failed.
    Decode(DecodeError),

    /// The buffer's high-water-mark was exceeded and the caller must back off.
    BufferFull,

    /// Attempted to mutate something that is already sealed/immutable
    /// (a frozen manifest, a sealed chunk, an immutable segment).
    IllegalTransition(&'static str),

    /// A segment's checksum did not match, or its schema version is
    /// unsupported. The segment is quarantined; reads fall through to the
    /// remaining segments.
    CorruptSegment {
        /// Path of the offending segment file.
        path: std::path::PathBuf,
        /// Why it was rejected.
        reason: CorruptReason,
    },

    /// Invalid or unsupported on-disk schema version, as read from a
    /// segment header.
    UnsupportedSchemaVersion(u32),

    /// A caller-supplied version was older than the kernel's current
    /// high-water-mark.
    VersionConflict {
        /// Version supplied by the caller.
        supplied: u64,
        /// Current high-water-mark.
        current: u64,
    },

    /// Compaction was aborted for a transient reason; the compactor will
    /// park and retry on the next trigger.
    CompactionAborted(String),
}

/// Why a segment was quarantined as corrupt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CorruptReason {
    /// The trailer checksum did not match the computed checksum.
    ChecksumMismatch,
    /// The magic header bytes were not recognized.
    BadMagic,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConcourseKernelError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Checksum mismatch detail, used by [`Checksum::check`].
#[derive(Debug)]
pub struct ChecksumMismatch {
    /// Expected checksum (stored in the trailer).
    pub expected: Checksum,
    /// Checksum actually computed while reading.
    pub got: Checksum,
}

/// Kernel result alias.
pub type Result<T> = std::result::Result<T, Error>;
