// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A durable file holding one chunk of each kind plus their manifests and
//! filters (spec §4.5, §6).
//!
//! A segment is born mutable and accepts [`Segment::acquire`]; `transfer`
//! seals it, writes it atomically and flips it immutable. Immutability is
//! terminal (spec I3).

use crate::{
    atoms::{Position, PrimaryKey, Text, Value},
    bloom::BloomFilter,
    chunk::{IndexChunk, PrimaryChunk, SearchChunk},
    checksum::Checksum,
    coding::{Decode, Encode},
    error::{CorruptReason, Error, Result},
    fs::{FileSystem, StdFileSystem},
    manifest::Manifest,
    revision::{IndexRevision, PrimaryRevision, SearchRevision},
    schema_version::{CURRENT_FORMAT_VERSION, CURRENT_SCHEMA_VERSION},
    write::Write as KernelWrite,
    Slice,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::Write as IoWrite,
    path::{Path, PathBuf},
};

const MAGIC: [u8; 4] = *b"CSEG";

/// `magic(4) + format version(2) + schema(4) + 3 chunk lens(8 each) +
/// 3 manifest offsets(8 each) + 3 bloom offsets(8 each)` (spec §6).
const HEADER_LEN: u64 = 4 + 2 + 4 + 3 * 8 + 3 * 8 + 3 * 8;

enum Storage<FS: FileSystem> {
    Mutable {
        primary: PrimaryChunk<FS>,
        index: IndexChunk<FS>,
        search: SearchChunk<FS>,
    },
    Immutable {
        path: PathBuf,
        primary: PrimaryChunk<FS>,
        index: IndexChunk<FS>,
        search: SearchChunk<FS>,
    },
}

/// One durable unit of storage: a primary, index and search chunk sharing
/// a single file (spec §4.5).
pub struct Segment<FS: FileSystem = StdFileSystem> {
    id: u64,
    storage: Storage<FS>,
}

impl<FS: FileSystem> Segment<FS> {
    /// Starts an empty, mutable segment identified by `id`.
    #[must_use]
    pub fn create(id: u64) -> Self {
        Self {
            id,
            storage: Storage::Mutable {
                primary: PrimaryChunk::create(),
                index: IndexChunk::create(),
                search: SearchChunk::create(),
            },
        }
    }

    /// The segment's identifier. Segments are named `<id>.seg` on disk
    /// (spec §6).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the segment still accepts `acquire` calls.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self.storage, Storage::Mutable { .. })
    }

    /// The file this segment was sealed to, once immutable.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Mutable { .. } => None,
            Storage::Immutable { path, .. } => Some(path),
        }
    }

    /// Borrows the segment's three chunks together, for callers (the
    /// database façade, the compactor) that need to query more than one of
    /// them at once.
    pub(crate) fn chunks(&self) -> (&PrimaryChunk<FS>, &IndexChunk<FS>, &SearchChunk<FS>) {
        match &self.storage {
            Storage::Mutable {
                primary,
                index,
                search,
            }
            | Storage::Immutable {
                primary,
                index,
                search,
                ..
            } => (primary, index, search),
        }
    }

    /// Borrows the primary chunk (record → field/value revisions).
    pub(crate) fn primary(&self) -> &PrimaryChunk<FS> {
        self.chunks().0
    }

    /// Borrows the index chunk (field/value → record revisions).
    pub(crate) fn index(&self) -> &IndexChunk<FS> {
        self.chunks().1
    }

    /// Borrows the search chunk (field/token → position revisions).
    pub(crate) fn search(&self) -> &SearchChunk<FS> {
        self.chunks().2
    }

    /// Dispatches a write into the primary, index, and (when the value is
    /// textual) search chunks (spec §4.5 `acquire`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if the segment is sealed.
    pub fn acquire(&mut self, write: &KernelWrite) -> Result<()> {
        let Storage::Mutable {
            primary,
            index,
            search,
        } = &mut self.storage
        else {
            return Err(Error::IllegalTransition("segment is sealed"));
        };

        primary.insert(PrimaryRevision::new(
            write.record(),
            write.key().clone(),
            write.value().clone(),
            write.timestamp(),
            write.version(),
            write.action(),
        ))?;

        index.insert(IndexRevision::new(
            write.key().clone(),
            write.value().clone(),
            write.record(),
            write.timestamp(),
            write.version(),
            write.action(),
        ))?;

        if let Some(text) = searchable_text(write.value()) {
            for (token_index, token) in tokenize(text).enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let position = Position::new(write.record(), token_index as u32);
                search.insert(SearchRevision::new(
                    write.key().clone(),
                    Text::new(token),
                    position,
                    write.timestamp(),
                    write.version(),
                    write.action(),
                ))?;
            }
        }

        Ok(())
    }

    /// Returns the source writes, reconstructed from the primary chunk,
    /// for re-ingestion elsewhere (spec §4.5 `writes()`, used by the
    /// compactor).
    ///
    /// # Errors
    ///
    /// Propagates a decode error if the primary chunk is corrupt.
    pub fn writes(&self) -> Result<Vec<KernelWrite>> {
        let (primary, _, _) = self.chunks();
        Ok(primary
            .revisions()?
            .into_iter()
            .map(|r| {
                KernelWrite::new(
                    r.key().clone(),
                    r.value().clone(),
                    *r.locator(),
                    r.action(),
                    r.timestamp(),
                    r.version(),
                )
            })
            .collect())
    }

    /// A human-debuggable dump of every revision in every chunk, newest
    /// insertion order preserved by chunk sort order.
    ///
    /// # Errors
    ///
    /// Propagates a decode error if a chunk is corrupt.
    pub fn dump(&self) -> Result<String> {
        let (primary, index, search) = self.chunks();
        let mut out = String::new();

        for r in primary.revisions()? {
            out.push_str(&format!(
                "P record={} key={} value={} {} v{}\n",
                r.locator(),
                r.key(),
                r.value(),
                r.action(),
                r.version()
            ));
        }
        for r in index.revisions()? {
            out.push_str(&format!(
                "I key={} value={} record={} {} v{}\n",
                r.locator(),
                r.key(),
                r.value(),
                r.action(),
                r.version()
            ));
        }
        for r in search.revisions()? {
            out.push_str(&format!(
                "S key={} term={} record={} token={} {} v{}\n",
                r.locator(),
                r.key(),
                r.value().record(),
                r.value().token_index(),
                r.action(),
                r.version()
            ));
        }

        Ok(out)
    }

    /// Seals the segment: serializes all three chunks, writes the file
    /// atomically, and flips the segment immutable (spec §4.5 `transfer`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] if already sealed, or
    /// propagates an I/O error from the atomic write.
    #[allow(clippy::indexing_slicing)]
    pub fn transfer(&mut self, path: &Path) -> Result<()> {
        let Storage::Mutable {
            primary,
            index,
            search,
        } = &self.storage
        else {
            return Err(Error::IllegalTransition("segment already sealed"));
        };

        let primary_folio = primary.serialize()?;
        let index_folio = index.serialize()?;
        let search_folio = search.serialize()?;

        #[allow(clippy::expect_used)]
        let chunk_lens: [u64; 3] = [
            primary_folio.bytes.len(),
            index_folio.bytes.len(),
            search_folio.bytes.len(),
        ]
        .map(|n| u64::try_from(n).expect("chunk exceeds u64 bytes"));

        #[allow(clippy::expect_used)]
        let manifest_lens: [u64; 3] = [
            primary_folio.manifest_bytes.len(),
            index_folio.manifest_bytes.len(),
            search_folio.manifest_bytes.len(),
        ]
        .map(|n| u64::try_from(n).expect("manifest exceeds u64 bytes"));

        #[allow(clippy::expect_used)]
        let bloom_lens: [u64; 3] = [
            primary_folio.bloom_bytes.len(),
            index_folio.bloom_bytes.len(),
            search_folio.bloom_bytes.len(),
        ]
        .map(|n| u64::try_from(n).expect("bloom filter exceeds u64 bytes"));

        let manifest_offs = [
            HEADER_LEN + chunk_lens[0] + chunk_lens[1] + chunk_lens[2],
            HEADER_LEN + chunk_lens[0] + chunk_lens[1] + chunk_lens[2] + manifest_lens[0],
            HEADER_LEN
                + chunk_lens[0]
                + chunk_lens[1]
                + chunk_lens[2]
                + manifest_lens[0]
                + manifest_lens[1],
        ];
        let bloom_region_start = manifest_offs[2] + manifest_lens[2];
        let bloom_offs = [
            bloom_region_start,
            bloom_region_start + bloom_lens[0],
            bloom_region_start + bloom_lens[0] + bloom_lens[1],
        ];

        let mut body = Vec::new();
        body.write_all(&MAGIC)?;
        body.write_u16::<BigEndian>(CURRENT_FORMAT_VERSION)?;
        body.write_u32::<BigEndian>(u32::from(CURRENT_SCHEMA_VERSION))?;
        for len in chunk_lens {
            body.write_u64::<BigEndian>(len)?;
        }
        for off in manifest_offs {
            body.write_u64::<BigEndian>(off)?;
        }
        for off in bloom_offs {
            body.write_u64::<BigEndian>(off)?;
        }

        body.write_all(&primary_folio.bytes)?;
        body.write_all(&index_folio.bytes)?;
        body.write_all(&search_folio.bytes)?;
        body.write_all(&primary_folio.manifest_bytes)?;
        body.write_all(&index_folio.manifest_bytes)?;
        body.write_all(&search_folio.manifest_bytes)?;
        body.write_all(&primary_folio.bloom_bytes)?;
        body.write_all(&index_folio.bloom_bytes)?;
        body.write_all(&search_folio.bloom_bytes)?;

        let checksum = Checksum::of(&body);
        body.write_u32::<BigEndian>(checksum.into_u32())?;

        crate::fs::atomic_write(path, &body)?;

        let file = Slice::from(body);
        #[allow(clippy::cast_possible_truncation)]
        let region = |start: u64, len: u64| file.slice(start as usize..(start + len) as usize);

        let primary_bytes = region(HEADER_LEN, chunk_lens[0]);
        let index_bytes = region(HEADER_LEN + chunk_lens[0], chunk_lens[1]);
        let search_bytes = region(HEADER_LEN + chunk_lens[0] + chunk_lens[1], chunk_lens[2]);

        let primary_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[0], manifest_lens[0]);
        let index_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[1], manifest_lens[1]);
        let search_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[2], manifest_lens[2]);

        let primary_bloom = BloomFilter::decode_from(&mut &primary_folio.bloom_bytes[..])?;
        let index_bloom = BloomFilter::decode_from(&mut &index_folio.bloom_bytes[..])?;
        let search_bloom = BloomFilter::decode_from(&mut &search_folio.bloom_bytes[..])?;

        self.storage = Storage::Immutable {
            path: path.to_path_buf(),
            primary: PrimaryChunk::load(primary_bytes, primary_manifest, primary_bloom),
            index: IndexChunk::load(index_bytes, index_manifest, index_bloom),
            search: SearchChunk::load(search_bytes, search_manifest, search_bloom),
        };

        Ok(())
    }

    /// Opens a previously sealed segment file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptSegment`] if the magic header or checksum
    /// don't match, [`Error::UnsupportedSchemaVersion`] if the schema
    /// version is not [`CURRENT_SCHEMA_VERSION`], or propagates an I/O
    /// error.
    #[allow(clippy::indexing_slicing)]
    pub fn load(id: u64, path: &Path) -> Result<Self> {
        let bytes = FS::read(path)?;
        let file = Slice::from(bytes);
        let mut reader: &[u8] = file.as_ref();

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::CorruptSegment {
                path: path.to_path_buf(),
                reason: CorruptReason::BadMagic,
            });
        }

        let _format_version = reader.read_u16::<BigEndian>()?;
        let schema_raw = reader.read_u32::<BigEndian>()?;
        if schema_raw != u32::from(CURRENT_SCHEMA_VERSION) {
            return Err(Error::UnsupportedSchemaVersion(schema_raw));
        }

        let mut chunk_lens = [0u64; 3];
        for len in &mut chunk_lens {
            *len = reader.read_u64::<BigEndian>()?;
        }
        let mut manifest_offs = [0u64; 3];
        for off in &mut manifest_offs {
            *off = reader.read_u64::<BigEndian>()?;
        }
        let mut bloom_offs = [0u64; 3];
        for off in &mut bloom_offs {
            *off = reader.read_u64::<BigEndian>()?;
        }

        let total_len = file.len();
        let body_len = total_len - 4;
        let stored_checksum = {
            let mut trailer = &file.as_ref()[body_len..];
            Checksum::from_raw(trailer.read_u32::<BigEndian>()?)
        };
        let computed_checksum = Checksum::of(&file.as_ref()[..body_len]);
        computed_checksum
            .check(stored_checksum)
            .map_err(|_| Error::CorruptSegment {
                path: path.to_path_buf(),
                reason: CorruptReason::ChecksumMismatch,
            })?;

        #[allow(clippy::cast_possible_truncation)]
        let region = |start: u64, len: u64| file.slice(start as usize..(start + len) as usize);

        let primary_bytes = region(HEADER_LEN, chunk_lens[0]);
        let index_bytes = region(HEADER_LEN + chunk_lens[0], chunk_lens[1]);
        let search_bytes = region(HEADER_LEN + chunk_lens[0] + chunk_lens[1], chunk_lens[2]);

        let manifest_lens = [
            manifest_offs[1] - manifest_offs[0],
            manifest_offs[2] - manifest_offs[1],
            bloom_offs[0] - manifest_offs[2],
        ];
        let primary_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[0], manifest_lens[0]);
        let index_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[1], manifest_lens[1]);
        let search_manifest = Manifest::<FS>::load(path.to_path_buf(), manifest_offs[2], manifest_lens[2]);

        let bloom_lens = [
            bloom_offs[1] - bloom_offs[0],
            bloom_offs[2] - bloom_offs[1],
            #[allow(clippy::cast_possible_truncation)]
            {
                body_len as u64 - bloom_offs[2]
            },
        ];
        let primary_bloom =
            BloomFilter::decode_from(&mut &file.as_ref()[bloom_offs[0] as usize..(bloom_offs[0] + bloom_lens[0]) as usize])?;
        let index_bloom =
            BloomFilter::decode_from(&mut &file.as_ref()[bloom_offs[1] as usize..(bloom_offs[1] + bloom_lens[1]) as usize])?;
        let search_bloom =
            BloomFilter::decode_from(&mut &file.as_ref()[bloom_offs[2] as usize..(bloom_offs[2] + bloom_lens[2]) as usize])?;

        Ok(Self {
            id,
            storage: Storage::Immutable {
                path: path.to_path_buf(),
                primary: PrimaryChunk::load(primary_bytes, primary_manifest, primary_bloom),
                index: IndexChunk::load(index_bytes, index_manifest, index_bloom),
                search: SearchChunk::load(search_bytes, search_manifest, search_bloom),
            },
        })
    }
}

/// Returns the text content of a value worth indexing for search, or
/// `None` for non-textual values.
fn searchable_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(t) | Value::Tag(t) => Some(t.as_str()),
        _ => None,
    }
}

/// Splits indexed text into search terms: lowercase, whitespace-delimited
/// tokens. Spec §9 leaves term normalisation open; this is the canonical
/// form this kernel documents and uses consistently for both indexing and
/// querying.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use test_log::test;

    fn write(key: &str, value: Value, record: u64, action: Action, version: u64) -> KernelWrite {
        KernelWrite::new(Text::new(key), value, PrimaryKey::new(record), action, 0, version)
    }

    #[test]
    fn acquire_then_transfer_preserves_writes() {
        let mut segment: Segment<StdFileSystem> = Segment::create(1);
        let writes = vec![
            write("name", Value::String(Text::new("jeff")), 1, Action::Add, 0),
            write("name", Value::String(Text::new("bob")), 2, Action::Add, 1),
            write("bio", Value::String(Text::new("loves rust code")), 1, Action::Add, 2),
        ];
        for w in &writes {
            segment.acquire(w).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.seg");
        segment.transfer(&path).unwrap();

        assert!(!segment.is_mutable());
        assert_eq!(segment.path(), Some(path.as_path()));

        let round_tripped = segment.writes().unwrap();
        assert_eq!(round_tripped.len(), writes.len());
        for w in &writes {
            assert!(round_tripped.contains(w));
        }
    }

    #[test]
    fn search_chunk_indexes_textual_values_only() {
        let mut segment: Segment<StdFileSystem> = Segment::create(1);
        segment
            .acquire(&write("bio", Value::String(Text::new("loves Rust code")), 1, Action::Add, 0))
            .unwrap();
        segment
            .acquire(&write("age", Value::Integer(30), 1, Action::Add, 1))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.seg");
        segment.transfer(&path).unwrap();

        let (_, _, search) = segment.chunks();
        let hits = search.seek(&Text::new("bio"), Some(&Text::new("rust"))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value().record(), PrimaryKey::new(1));
    }

    #[test]
    fn transfer_is_terminal() {
        let mut segment: Segment<StdFileSystem> = Segment::create(1);
        let dir = tempfile::tempdir().unwrap();
        segment.transfer(&dir.path().join("1.seg")).unwrap();
        assert!(segment
            .acquire(&write("name", Value::String(Text::new("x")), 1, Action::Add, 0))
            .is_err());
        assert!(segment.transfer(&dir.path().join("2.seg")).is_err());
    }

    #[test]
    fn load_reopens_a_sealed_segment() {
        let mut segment: Segment<StdFileSystem> = Segment::create(7);
        segment
            .acquire(&write("name", Value::String(Text::new("jeff")), 1, Action::Add, 0))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7.seg");
        segment.transfer(&path).unwrap();

        let reopened: Segment<StdFileSystem> = Segment::load(7, &path).unwrap();
        assert_eq!(reopened.id(), 7);
        assert!(!reopened.is_mutable());
        let writes = reopened.writes().unwrap();
        assert_eq!(writes.len(), 1);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.seg");
        std::fs::write(&path, b"not a segment file at all, padding....").unwrap();
        let err = Segment::<StdFileSystem>::load(1, &path).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptSegment {
                reason: CorruptReason::BadMagic,
                ..
            }
        ));
    }
}
