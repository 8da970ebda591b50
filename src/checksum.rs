// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::error::{ChecksumMismatch, CorruptReason};

/// A CRC32C checksum, as stored in the segment trailer (spec §6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u32);

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Checksum {
    /// Wraps a raw checksum value.
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw 32-bit integer.
    #[must_use]
    pub fn into_u32(self) -> u32 {
        self.0
    }

    /// Computes the checksum of a single byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32c::crc32c(bytes))
    }

    /// Returns `Ok(())` if `self` matches `expected`, else a
    /// [`ChecksumMismatch`].
    pub(crate) fn check(&self, expected: Self) -> Result<(), ChecksumMismatch> {
        if self.0 == expected.0 {
            Ok(())
        } else {
            Err(ChecksumMismatch {
                expected,
                got: *self,
            })
        }
    }
}

impl From<CorruptReason> for &'static str {
    fn from(value: CorruptReason) -> Self {
        match value {
            CorruptReason::ChecksumMismatch => "checksum mismatch",
            CorruptReason::BadMagic => "bad magic header",
        }
    }
}

/// Incrementally accumulates a CRC32C checksum while writing.
pub struct ChecksummedWriter<W: std::io::Write> {
    inner: W,
    crc: u32,
}

impl<W: std::io::Write> ChecksummedWriter<W> {
    /// Wraps `writer`, tracking a running CRC32C of everything written.
    pub fn new(writer: W) -> Self {
        Self { inner: writer, crc: 0 }
    }

    /// Returns the checksum of all bytes written so far.
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        Checksum::from_raw(self.crc)
    }

    /// Returns the wrapped writer.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: std::io::Write> std::io::Write for ChecksummedWriter<W> {
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.crc = crc32c::crc32c_append(self.crc, &buf[..written]);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn checksum_matches_one_shot() {
        let mut w = ChecksummedWriter::new(Vec::new());
        w.write_all(b"hello").unwrap();
        w.write_all(b" world").unwrap();
        assert_eq!(w.checksum(), Checksum::of(b"hello world"));
    }

    #[test]
    fn checksum_detects_corruption() {
        let good = Checksum::of(b"abc");
        let bad = Checksum::of(b"abd");
        assert!(good.check(good).is_ok());
        assert!(good.check(bad).is_err());
    }
}
