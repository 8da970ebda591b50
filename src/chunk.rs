// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A sorted, immutable run of [`Revision`]s with an auxiliary bloom filter
//! and manifest (spec §4.2).
//!
//! `Chunk<L, K, V>` is the "capability-constrained generic" the spec's
//! design notes recommend in place of inheritance across the three chunk
//! flavours: `PrimaryChunk`, `IndexChunk` and `SearchChunk` are all the
//! same struct at different type parameters.

use crate::{
    atoms::{PrimaryKey, Position, Text, Value},
    bloom::BloomFilter,
    coding::{Decode, Encode},
    error::{Error, Result},
    fs::FileSystem,
    hash::Fingerprint,
    manifest::Manifest,
    revision::{composite_fingerprint_of, Fingerprintable, Revision},
    Slice,
};

/// Target false positive rate for chunk bloom filters (spec §4.4).
const BLOOM_FPR: f32 = 0.03;

enum Storage<L, K, V, FS: FileSystem> {
    Mutable(Vec<Revision<L, K, V>>),
    Sealed {
        bytes: Slice,
        manifest: Manifest<FS>,
        bloom: BloomFilter,
    },
}

/// The serialized form of a sealed chunk, ready to be written into a
/// segment (spec §4.2 "`serialize()` returns a `Folio{bytes, manifest,
/// bloom}`").
pub struct Folio {
    /// Concatenated revision records in sort order.
    pub bytes: Vec<u8>,
    /// Encoded manifest bytes.
    pub manifest_bytes: Vec<u8>,
    /// Encoded bloom filter bytes.
    pub bloom_bytes: Vec<u8>,
}

/// A sorted, immutable run of revisions plus its bloom filter and
/// manifest.
pub struct Chunk<L, K, V, FS: FileSystem = crate::fs::StdFileSystem> {
    storage: Storage<L, K, V, FS>,
}

impl<L, K, V, FS> Chunk<L, K, V, FS>
where
    L: Fingerprintable + Ord + Clone + Encode + Decode,
    K: Fingerprintable + Ord + Clone + Encode + Decode,
    V: Ord + Clone + Encode + Decode,
    FS: FileSystem,
{
    /// Starts an empty, mutable chunk.
    #[must_use]
    pub fn create() -> Self {
        Self {
            storage: Storage::Mutable(Vec::new()),
        }
    }

    /// Wraps a previously sealed chunk's raw bytes, manifest and bloom
    /// filter (spec §4.2 `load`). Never copies the region eagerly; the
    /// manifest itself may still be unloaded (spec P6).
    #[must_use]
    pub fn load(bytes: Slice, manifest: Manifest<FS>, bloom: BloomFilter) -> Self {
        Self {
            storage: Storage::Sealed {
                bytes,
                manifest,
                bloom,
            },
        }
    }

    /// Whether the chunk still accepts `insert` calls.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self.storage, Storage::Mutable(_))
    }

    /// Number of revisions, only cheap while mutable.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Mutable(revisions) => revisions.len(),
            Storage::Sealed { .. } => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a revision. Permitted only while mutable (spec §4.2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if the chunk is sealed.
    pub fn insert(&mut self, revision: Revision<L, K, V>) -> Result<()> {
        match &mut self.storage {
            Storage::Mutable(revisions) => {
                revisions.push(revision);
                Ok(())
            }
            Storage::Sealed { .. } => Err(Error::IllegalTransition("chunk is sealed")),
        }
    }

    /// Returns every revision matching `locator` (and, if given, `key`),
    /// using the bloom filter as a pre-filter and the manifest for a byte
    /// range when sealed (spec §4.2 `seek`).
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from a deferred manifest load, or a decode
    /// error if sealed bytes are corrupt.
    pub fn seek(&self, locator: &L, key: Option<&K>) -> Result<Vec<Revision<L, K, V>>> {
        match &self.storage {
            Storage::Mutable(revisions) => Ok(revisions
                .iter()
                .filter(|r| r.locator() == locator && key.is_none_or(|k| r.key() == k))
                .cloned()
                .collect()),
            Storage::Sealed {
                bytes,
                manifest,
                bloom,
            } => {
                let locator_fp = locator.fingerprint();
                let probe_fp = match key {
                    Some(k) => composite_fingerprint_of(locator_fp, k.fingerprint()),
                    None => locator_fp,
                };

                if !bloom.contains_fingerprint(probe_fp) {
                    return Ok(Vec::new());
                }

                let Some((start, end)) = manifest.range(probe_fp)? else {
                    return Ok(Vec::new());
                };

                #[allow(clippy::cast_possible_truncation)]
                let region: &[u8] = &bytes.as_ref()[start as usize..end as usize];
                let mut reader = region;
                let mut hits = Vec::new();

                while !reader.is_empty() {
                    let revision = Revision::<L, K, V>::decode_from(&mut reader)?;
                    if revision.locator() == locator && key.is_none_or(|k| revision.key() == k) {
                        hits.push(revision);
                    }
                }
                Ok(hits)
            }
        }
    }

    /// Returns every revision the chunk holds, in sort order. Used for
    /// full scans (`Segment::writes`, `Segment::dump`, compaction) rather
    /// than point lookups, so it bypasses the bloom filter and manifest
    /// entirely.
    ///
    /// # Errors
    ///
    /// Propagates a decode error if sealed bytes are corrupt.
    pub fn revisions(&self) -> Result<Vec<Revision<L, K, V>>> {
        match &self.storage {
            Storage::Mutable(revisions) => Ok(revisions.clone()),
            Storage::Sealed { bytes, .. } => {
                let mut reader: &[u8] = bytes.as_ref();
                let mut out = Vec::new();
                while !reader.is_empty() {
                    out.push(Revision::<L, K, V>::decode_from(&mut reader)?);
                }
                Ok(out)
            }
        }
    }

    /// Seals the chunk: sorts its revisions per I1, builds the manifest
    /// and bloom filter, and returns their serialized form. The chunk
    /// itself remains mutable in memory — callers that want a sealed,
    /// queryable chunk should rebuild one via [`Chunk::load`] from the
    /// returned bytes.
    ///
    /// # Errors
    ///
    /// Propagates any encode error (practically infallible for in-memory
    /// buffers).
    pub fn serialize(&self) -> Result<Folio> {
        let Storage::Mutable(revisions) = &self.storage else {
            return Err(Error::IllegalTransition("chunk already sealed"));
        };

        let mut sorted: Vec<&Revision<L, K, V>> = revisions.iter().collect();
        sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let manifest = Manifest::<FS>::create(sorted.len() * 2);
        let mut bloom = BloomFilter::with_fp_rate(sorted.len().max(1), BLOOM_FPR);
        let mut bytes = Vec::new();

        let mut prev_locator_fp: Option<Fingerprint> = None;
        let mut prev_composite_fp: Option<Fingerprint> = None;

        for revision in sorted {
            #[allow(clippy::expect_used)]
            let start: u64 = bytes.len().try_into().expect("chunk exceeds u64 bytes");
            revision.encode_into(&mut bytes)?;
            #[allow(clippy::expect_used)]
            let end: u64 = bytes.len().try_into().expect("chunk exceeds u64 bytes");

            let locator_fp = revision.locator_fingerprint();
            if prev_locator_fp != Some(locator_fp) {
                manifest.put_start(locator_fp, start)?;
                bloom.set_with_fingerprint(locator_fp);
            }
            manifest.put_end(locator_fp, end)?;

            let composite_fp = revision.composite_fingerprint();
            if prev_composite_fp != Some(composite_fp) {
                manifest.put_start(composite_fp, start)?;
                bloom.set_with_fingerprint(composite_fp);
            }
            manifest.put_end(composite_fp, end)?;

            prev_locator_fp = Some(locator_fp);
            prev_composite_fp = Some(composite_fp);
        }

        let manifest_dir = tempfile::tempdir()?;
        let manifest_path = manifest_dir.path().join("manifest");
        manifest.freeze(&manifest_path)?;
        let manifest_bytes = std::fs::read(&manifest_path)?;

        Ok(Folio {
            bytes,
            manifest_bytes,
            bloom_bytes: bloom.encode_into_vec(),
        })
    }
}

/// A chunk of [`crate::revision::PrimaryRevision`]s.
pub type PrimaryChunk<FS = crate::fs::StdFileSystem> = Chunk<PrimaryKey, Text, Value, FS>;

/// A chunk of [`crate::revision::IndexRevision`]s.
pub type IndexChunk<FS = crate::fs::StdFileSystem> = Chunk<Text, Value, PrimaryKey, FS>;

/// A chunk of [`crate::revision::SearchRevision`]s.
pub type SearchChunk<FS = crate::fs::StdFileSystem> = Chunk<Text, Text, Position, FS>;

impl<L, K, V, FS> Default for Chunk<L, K, V, FS>
where
    L: Fingerprintable + Ord + Clone + Encode + Decode,
    K: Fingerprintable + Ord + Clone + Encode + Decode,
    V: Ord + Clone + Encode + Decode,
    FS: FileSystem,
{
    fn default() -> Self {
        Self::create()
    }
}
