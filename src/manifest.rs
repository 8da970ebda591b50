// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-chunk directory mapping fingerprints to byte ranges (spec §4.3).
//!
//! A [`Manifest`] has two independent axes of state: whether it is still
//! accepting `put_start`/`put_end` calls (`frozen`) and whether its entries
//! are resident in memory (`loaded`). A freshly built manifest is loaded
//! and mutable; [`Manifest::load`] constructs one that is frozen (it
//! represents a sealed chunk) but not yet loaded — the bytes are only read
//! from disk on the first `get_start`/`get_end` call (spec P6).

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    error::{Error, Result},
    fs::FileSystem,
    hash::Fingerprint,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap as HashMap;
use std::{
    io::{Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

#[derive(Debug, Default, Clone, Copy)]
struct PartialRange {
    start: Option<u64>,
    end: Option<u64>,
}

#[derive(Debug)]
enum Entries {
    /// Entries live in memory, possibly still under construction.
    Resident(HashMap<Fingerprint, PartialRange>),
    /// Entries have not been read from disk yet.
    Unloaded {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

/// A directory of `fingerprint -> (start, end)` entries within a chunk.
#[derive(Debug)]
pub struct Manifest<FS: FileSystem = crate::fs::StdFileSystem> {
    entries: Mutex<Entries>,
    frozen: AtomicBool,
    _fs: PhantomData<FS>,
}

impl<FS: FileSystem> Manifest<FS> {
    /// Starts an empty, mutable manifest expected to hold about `capacity`
    /// entries.
    #[must_use]
    pub fn create(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::Resident(HashMap::with_capacity(capacity))),
            frozen: AtomicBool::new(false),
            _fs: PhantomData,
        }
    }

    /// Constructs a manifest that defers reading its entries until the
    /// first lookup (spec P6). The manifest is implicitly frozen: it
    /// represents a chunk that has already been sealed.
    #[must_use]
    pub fn load(path: PathBuf, offset: u64, length: u64) -> Self {
        Self {
            entries: Mutex::new(Entries::Unloaded {
                path,
                offset,
                length,
            }),
            frozen: AtomicBool::new(true),
            _fs: PhantomData,
        }
    }

    /// Whether the entries have been read into memory yet.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        #[allow(clippy::expect_used)]
        matches!(
            &*self.entries.lock().expect("manifest lock poisoned"),
            Entries::Resident(_)
        )
    }

    /// Whether `freeze` has been called (or this manifest was constructed
    /// via `load`).
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn ensure_loaded(&self) -> Result<()> {
        #[allow(clippy::expect_used)]
        let mut guard = self.entries.lock().expect("manifest lock poisoned");

        let (path, offset, length) = match &*guard {
            Entries::Resident(_) => return Ok(()),
            Entries::Unloaded {
                path,
                offset,
                length,
            } => (path.clone(), *offset, *length),
        };

        let bytes = FS::read_range(&path, offset, length)?;
        let mut reader = &bytes[..];
        let entries = decode_entries(&mut reader)?;
        *guard = Entries::Resident(
            entries
                .into_iter()
                .map(|(fp, (start, end))| {
                    (
                        fp,
                        PartialRange {
                            start: Some(start),
                            end: Some(end),
                        },
                    )
                })
                .collect(),
        );
        Ok(())
    }

    /// Records the start offset for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if the manifest is frozen.
    pub fn put_start(&self, fingerprint: Fingerprint, start: u64) -> Result<()> {
        self.mutate(|entries| entries.entry(fingerprint).or_default().start = Some(start))
    }

    /// Records the end offset for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if the manifest is frozen.
    pub fn put_end(&self, fingerprint: Fingerprint, end: u64) -> Result<()> {
        self.mutate(|entries| entries.entry(fingerprint).or_default().end = Some(end))
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<Fingerprint, PartialRange>)) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::IllegalTransition("manifest is frozen"));
        }

        #[allow(clippy::expect_used)]
        let mut guard = self.entries.lock().expect("manifest lock poisoned");
        match &mut *guard {
            Entries::Resident(entries) => {
                f(entries);
                Ok(())
            }
            Entries::Unloaded { .. } => Err(Error::IllegalTransition(
                "manifest is not loaded for mutation",
            )),
        }
    }

    /// Freezes the manifest (no further `put_start`/`put_end` calls will
    /// succeed) and writes it atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if already frozen, or an I/O
    /// error if the write fails.
    pub fn freeze(&self, path: &Path) -> Result<()> {
        if self.frozen.swap(true, Ordering::AcqRel) {
            return Err(Error::IllegalTransition("manifest already frozen"));
        }

        let bytes = self.encode_into_vec_checked()?;
        crate::fs::atomic_write(path, &bytes)?;
        Ok(())
    }

    fn encode_into_vec_checked(&self) -> Result<Vec<u8>> {
        #[allow(clippy::expect_used)]
        let guard = self.entries.lock().expect("manifest lock poisoned");
        let Entries::Resident(entries) = &*guard else {
            return Err(Error::IllegalTransition("manifest is not loaded"));
        };

        let mut complete = Vec::with_capacity(entries.len());
        for (fingerprint, range) in entries {
            let (Some(start), Some(end)) = (range.start, range.end) else {
                return Err(Error::IllegalTransition(
                    "manifest entry missing start or end",
                ));
            };
            complete.push((*fingerprint, start, end));
        }

        let mut buf = Vec::new();
        encode_entries(&complete, &mut buf)?;
        Ok(buf)
    }

    /// Returns `(start, end)` for `fingerprint`, loading entries from disk
    /// on first access if necessary (spec P6).
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred load.
    pub fn range(&self, fingerprint: Fingerprint) -> Result<Option<(u64, u64)>> {
        self.ensure_loaded()?;

        #[allow(clippy::expect_used)]
        let guard = self.entries.lock().expect("manifest lock poisoned");
        let Entries::Resident(entries) = &*guard else {
            unreachable!("ensure_loaded guarantees residency");
        };

        Ok(entries
            .get(&fingerprint)
            .and_then(|r| r.start.zip(r.end)))
    }

    /// Returns the start offset for `fingerprint`, loading on demand.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred load.
    pub fn get_start(&self, fingerprint: Fingerprint) -> Result<Option<u64>> {
        Ok(self.range(fingerprint)?.map(|(start, _)| start))
    }

    /// Returns the end offset for `fingerprint`, loading on demand.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred load.
    pub fn get_end(&self, fingerprint: Fingerprint) -> Result<Option<u64>> {
        Ok(self.range(fingerprint)?.map(|(_, end)| end))
    }

    /// Number of complete entries, loading on demand.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred load.
    pub fn len(&self) -> Result<usize> {
        self.ensure_loaded()?;

        #[allow(clippy::expect_used)]
        let guard = self.entries.lock().expect("manifest lock poisoned");
        let Entries::Resident(entries) = &*guard else {
            unreachable!("ensure_loaded guarantees residency");
        };
        Ok(entries.values().filter(|r| r.start.is_some() && r.end.is_some()).count())
    }

    /// Whether the manifest has zero complete entries.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred load.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn encode_entries<W: Write>(entries: &[(Fingerprint, u64, u64)], writer: &mut W) -> Result<()> {
    #[allow(clippy::expect_used)]
    let count: u32 = entries.len().try_into().expect("manifest too large");
    writer.write_u32::<BigEndian>(count).map_err(EncodeError::from)?;

    for (fingerprint, start, end) in entries {
        writer
            .write_u128::<BigEndian>(fingerprint.into_u128())
            .map_err(EncodeError::from)?;
        writer.write_u64::<BigEndian>(*start).map_err(EncodeError::from)?;
        writer.write_u64::<BigEndian>(*end).map_err(EncodeError::from)?;
    }
    Ok(())
}

fn decode_entries<R: Read>(reader: &mut R) -> Result<Vec<(Fingerprint, (u64, u64))>> {
    let count = reader.read_u32::<BigEndian>().map_err(DecodeError::from)? as usize;
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let fingerprint = Fingerprint::from_raw(
            reader.read_u128::<BigEndian>().map_err(DecodeError::from)?,
        );
        let start = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let end = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        entries.push((fingerprint, (start, end)));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use crate::hash::fingerprint_bytes;
    use test_log::test;

    #[test]
    fn put_then_range_round_trips() {
        let manifest = Manifest::<StdFileSystem>::create(4);
        let fp = fingerprint_bytes(b"locator");
        manifest.put_start(fp, 10).unwrap();
        manifest.put_end(fp, 20).unwrap();
        assert_eq!(manifest.range(fp).unwrap(), Some((10, 20)));
    }

    /// Spec P5: after `freeze`, mutating calls fail with `IllegalTransition`.
    #[test]
    fn mutating_after_freeze_fails() {
        let manifest = Manifest::<StdFileSystem>::create(4);
        let fp = fingerprint_bytes(b"locator");
        manifest.put_start(fp, 0).unwrap();
        manifest.put_end(fp, 1).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest");
        manifest.freeze(&path).unwrap();

        assert!(manifest.put_start(fp, 5).is_err());
        assert!(manifest.put_end(fp, 5).is_err());
        assert!(manifest.freeze(&path).is_err());
    }

    /// Spec P6: `load` returns `isLoaded=false`; the first lookup flips it
    /// to `true` and returns the correct offset.
    #[test]
    fn load_is_lazy() {
        let manifest = Manifest::<StdFileSystem>::create(2);
        let fp = fingerprint_bytes(b"a");
        manifest.put_start(fp, 3).unwrap();
        manifest.put_end(fp, 9).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest");
        manifest.freeze(&path).unwrap();
        let length = std::fs::metadata(&path).unwrap().len();

        let reloaded = Manifest::<StdFileSystem>::load(path, 0, length);
        assert!(!reloaded.is_loaded());

        assert_eq!(reloaded.get_start(fp).unwrap(), Some(3));
        assert!(reloaded.is_loaded());
        assert_eq!(reloaded.get_end(fp).unwrap(), Some(9));
    }
}
