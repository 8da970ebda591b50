// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The kernel façade: buffer, current mutable segment, and sealed segment
//! list wired together behind the read/write operations spec §4.6
//! describes (`acquire`, `verify`, `select`, `find`, `search`, `browse`,
//! `audit`, `iterate`, plus administrative `compact`/`dump`/`fsync`).
//!
//! Reads fan out newest-first: the buffer, then the current mutable
//! segment, then sealed segments from newest to oldest (spec §4.6).

use crate::{
    action::Action,
    atoms::{PrimaryKey, Text, Value},
    buffer::Buffer,
    compaction::{worker::CompactionProvider, CompactionPolicy, StorageContext},
    config::KernelConfig,
    error::Result,
    fs::{FileSystem, StdFileSystem},
    segment::Segment,
    segment_list::SegmentList,
    write::Write as KernelWrite,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Revision tuple returned by [`Database::audit`]: `(key, value, action,
/// timestamp, version)`.
pub type AuditEntry = (Text, Value, Action, u64, u64);

/// The storage kernel's public surface.
pub struct Database<FS: FileSystem = StdFileSystem> {
    buffer: Buffer,
    current: Mutex<Segment<FS>>,
    segments: SegmentList<FS>,
    database_dir: PathBuf,
}

fn segment_id_from_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".seg").and_then(|stem| stem.parse().ok())
}

impl<FS: FileSystem> Database<FS> {
    /// Opens (and, if necessary, creates) the database directory named in
    /// `config`, reloading every sealed segment it finds there.
    ///
    /// # Errors
    ///
    /// Propagates an I/O error from creating the directory, listing it, or
    /// loading one of its segment files, or [`crate::error::Error::CorruptSegment`]
    /// if a segment file fails its checksum.
    pub fn open(config: &KernelConfig) -> Result<Self> {
        FS::create_dir_all(&config.database_dir)?;

        let mut loaded: Vec<(u64, Segment<FS>)> = Vec::new();
        for entry in FS::read_dir(&config.database_dir)? {
            if entry.is_dir() {
                continue;
            }
            let Some(id) = segment_id_from_file_name(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            loaded.push((id, Segment::load(id, entry.path())?));
        }
        loaded.sort_by_key(|(id, _)| *id);

        let segments = SegmentList::new();
        let highest = loaded.last().map_or(0, |(id, _)| *id);
        for (_, segment) in loaded {
            segments.push(segment);
        }
        segments.seed_next_id(highest);

        let current = Segment::create(segments.next_id());

        Ok(Self {
            buffer: Buffer::new(config.high_water_mark),
            current: Mutex::new(current),
            segments,
            database_dir: config.database_dir.clone(),
        })
    }

    /// Appends a write to the buffer (spec §4.1/§4.6 `acquire`).
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer has been sealed by a prior fatal
    /// transfer failure.
    pub fn acquire(&self, write: KernelWrite) -> Result<u64> {
        let write = if write.timestamp() == 0 {
            #[allow(clippy::cast_possible_truncation)]
            let now = crate::time::unix_timestamp().as_millis() as u64;
            KernelWrite::new(write.key().clone(), write.value().clone(), write.record(), write.action(), now, write.version())
        } else {
            write
        };
        self.buffer.insert(write)
    }

    /// Whether `(key, value, record)` is currently present, as of
    /// `timestamp` (or now, if `None`): the net parity of every matching
    /// write across the buffer, the current segment, and every sealed
    /// segment (spec §4.6 `verify`, I6).
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn verify(&self, key: &Text, value: &Value, record: PrimaryKey, timestamp: Option<u64>) -> Result<bool> {
        let mut count = self
            .buffer
            .iterate()
            .filter(|w| w.matches(key, value, record) && timestamp.is_none_or(|ts| w.version() <= ts))
            .count();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.primary().seek(&record, Some(key))? {
            if revision.value() == value && timestamp.is_none_or(|ts| revision.version() <= ts) {
                count += 1;
            }
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.primary().seek(&record, Some(key))? {
                if revision.value() == value && timestamp.is_none_or(|ts| revision.version() <= ts) {
                    count += 1;
                }
            }
        }

        Ok(count % 2 == 1)
    }

    /// Every key/value pair currently visible at `record`, grouped by key
    /// (spec §4.6 `select`). A `(key, value)` pair is visible when its
    /// total occurrence count across the buffer and every segment is odd.
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn select(&self, record: PrimaryKey) -> Result<BTreeMap<Text, BTreeSet<Value>>> {
        let mut counts: BTreeMap<(Text, Value), usize> = BTreeMap::new();

        for write in self.buffer.iterate().filter(|w| w.record() == record) {
            *counts.entry((write.key().clone(), write.value().clone())).or_default() += 1;
        }

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.primary().seek(&record, None)? {
            *counts.entry((revision.key().clone(), revision.value().clone())).or_default() += 1;
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.primary().seek(&record, None)? {
                *counts.entry((revision.key().clone(), revision.value().clone())).or_default() += 1;
            }
        }

        let mut visible: BTreeMap<Text, BTreeSet<Value>> = BTreeMap::new();
        for ((key, value), count) in counts {
            if count % 2 == 1 {
                visible.entry(key).or_default().insert(value);
            }
        }
        Ok(visible)
    }

    /// Every record currently holding `value` under `key` (spec §4.6
    /// `find`, an equality lookup through the index chunk).
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn find(&self, key: &Text, value: &Value) -> Result<BTreeSet<PrimaryKey>> {
        let mut counts: BTreeMap<PrimaryKey, usize> = BTreeMap::new();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.index().seek(key, Some(value))? {
            *counts.entry(*revision.value()).or_default() += 1;
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.index().seek(key, Some(value))? {
                *counts.entry(*revision.value()).or_default() += 1;
            }
        }

        Ok(counts.into_iter().filter(|(_, count)| count % 2 == 1).map(|(record, _)| record).collect())
    }

    /// Every `(value, record)` pair currently indexed under `key` (spec
    /// §4.6 `browse`): a full enumeration of the index chunk for one key,
    /// grouped by value.
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn browse(&self, key: &Text) -> Result<BTreeMap<Value, BTreeSet<PrimaryKey>>> {
        let mut counts: BTreeMap<(Value, PrimaryKey), usize> = BTreeMap::new();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.index().seek(key, None)? {
            *counts.entry((revision.key().clone(), *revision.value())).or_default() += 1;
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.index().seek(key, None)? {
                *counts.entry((revision.key().clone(), *revision.value())).or_default() += 1;
            }
        }

        let mut visible: BTreeMap<Value, BTreeSet<PrimaryKey>> = BTreeMap::new();
        for ((value, record), count) in counts {
            if count % 2 == 1 {
                visible.entry(value).or_default().insert(record);
            }
        }
        Ok(visible)
    }

    /// Every record whose indexed text under `key` currently contains
    /// `term` (spec §4.6 `search`). `term` is lowercased to match the
    /// indexing-time normalization (see `segment::tokenize`).
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn search(&self, key: &Text, term: &str) -> Result<BTreeSet<PrimaryKey>> {
        let token = Text::new(term.to_lowercase());
        let mut counts: BTreeMap<crate::atoms::Position, usize> = BTreeMap::new();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.search().seek(key, Some(&token))? {
            *counts.entry(*revision.value()).or_default() += 1;
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.search().seek(key, Some(&token))? {
                *counts.entry(*revision.value()).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .filter(|(_, count)| count % 2 == 1)
            .map(|(position, _)| position.record())
            .collect())
    }

    /// The full write history of `record`, across every key, in version
    /// order, without collapsing parity (spec §4.6 `audit`).
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn audit(&self, record: PrimaryKey) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .buffer
            .iterate()
            .filter(|w| w.record() == record)
            .map(|w| (w.key().clone(), w.value().clone(), w.action(), w.timestamp(), w.version()))
            .collect();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.primary().seek(&record, None)? {
            entries.push((
                revision.key().clone(),
                revision.value().clone(),
                revision.action(),
                revision.timestamp(),
                revision.version(),
            ));
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.primary().seek(&record, None)? {
                entries.push((
                    revision.key().clone(),
                    revision.value().clone(),
                    revision.action(),
                    revision.timestamp(),
                    revision.version(),
                ));
            }
        }

        entries.sort_by_key(|(_, _, _, _, version)| *version);
        Ok(entries)
    }

    /// Every distinct record the database has ever seen a write for (spec
    /// §4.6 `iterate`), live or not.
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn iterate(&self) -> Result<BTreeSet<PrimaryKey>> {
        let mut records: BTreeSet<PrimaryKey> = self.buffer.iterate().map(|w| w.record()).collect();

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        for revision in current.primary().revisions()? {
            records.insert(*revision.locator());
        }
        drop(current);

        for segment in self.segments.snapshot() {
            for revision in segment.primary().revisions()? {
                records.insert(*revision.locator());
            }
        }
        Ok(records)
    }

    /// Forces the buffer's contents into a newly sealed segment right now,
    /// rather than waiting for an automatic transfer (spec §4.1/§4.6
    /// `fsync`).
    ///
    /// # Errors
    ///
    /// Propagates whatever [`Buffer::transfer`] or [`Segment::transfer`]
    /// returns.
    pub fn fsync(&self) -> Result<()> {
        #[allow(clippy::expect_used)]
        let mut current = self.current.lock().expect("current segment lock poisoned");
        self.buffer.transfer(&mut current)?;

        let id = current.id();
        let path = self.segment_path(id);
        current.transfer(&path)?;

        let sealed = std::mem::replace(&mut *current, Segment::create(self.segments.next_id()));
        self.segments.push(sealed);
        Ok(())
    }

    /// Attempts one manual compaction round over the oldest adjacent pair
    /// of sealed segments (spec §4.6 administrative `compact`). Returns
    /// whether a merge actually happened.
    ///
    /// # Errors
    ///
    /// Propagates an error from the policy's `compact` call or from
    /// sealing the merged segment.
    pub fn compact(&self, policy: &dyn CompactionPolicy<FS>) -> Result<bool> {
        let segments = self.segments.snapshot();
        if segments.len() < 2 {
            return Ok(false);
        }

        let context = self.context();
        if !policy.is_triggered(&context) {
            return Ok(false);
        }

        #[allow(clippy::indexing_slicing)]
        let (a, b) = (&segments[0], &segments[1]);
        if !policy.is_optimization_possible(&context, a, b) {
            return Ok(false);
        }

        let next_id = self.segments.next_id();
        let Some(mut merged) = policy.compact(a, b, next_id)? else {
            return Ok(false);
        };
        merged.transfer(&self.segment_path(next_id))?;

        let swapped = self.segments.swap_pair(0, 1, merged);
        if swapped {
            self.segments.collect_garbage()?;
        }
        Ok(swapped)
    }

    /// A human-debuggable dump of the buffer, the current segment, and
    /// every sealed segment (spec §4.6 administrative `dump`).
    ///
    /// # Errors
    ///
    /// Propagates a decode error from a corrupt sealed segment.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        for write in self.buffer.iterate() {
            out.push_str(&format!(
                "B record={} key={} value={} {} v{}\n",
                write.record(),
                write.key(),
                write.value(),
                write.action(),
                write.version()
            ));
        }

        #[allow(clippy::expect_used)]
        let current = self.current.lock().expect("current segment lock poisoned");
        out.push_str(&current.dump()?);
        drop(current);

        for segment in self.segments.snapshot() {
            out.push_str(&segment.dump()?);
        }
        Ok(out)
    }

    fn segment_path(&self, id: u64) -> PathBuf {
        self.database_dir.join(format!("{id}.seg"))
    }
}

impl<FS: FileSystem> CompactionProvider<FS> for Database<FS> {
    /// Disk-space probing needs a platform crate this kernel's dependency
    /// stack doesn't carry; this reports unlimited headroom so a policy's
    /// disk check never blocks by default. A deployment that needs real
    /// headroom enforcement supplies its own [`CompactionProvider`].
    fn context(&self) -> StorageContext {
        StorageContext {
            available_disk_space: u64::MAX,
            total_disk_space: u64::MAX,
            mutable_segments: 1,
        }
    }

    fn segment_path(&self, id: u64) -> PathBuf {
        Database::segment_path(self, id)
    }
}

impl<FS: FileSystem> Database<FS> {
    /// The directory this database's segments live under.
    #[must_use]
    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    fn open(dir: &Path) -> Database<StdFileSystem> {
        let config = KernelConfig::new(dir);
        Database::open(&config).unwrap()
    }

    fn write(key: &str, value: &str, record: u64, action: Action) -> KernelWrite {
        KernelWrite::new(Text::new(key), Value::String(Text::new(value)), PrimaryKey::new(record), action, 0, 0)
    }

    /// Spec E1.
    #[test]
    fn add_then_remove_flips_verify() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
        assert!(db
            .verify(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1), None)
            .unwrap());

        db.acquire(write("name", "jeff", 1, Action::Remove)).unwrap();
        assert!(!db
            .verify(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1), None)
            .unwrap());
    }

    #[test]
    fn verify_sees_writes_after_fsync_into_a_sealed_segment() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
        db.fsync().unwrap();

        assert!(db
            .verify(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1), None)
            .unwrap());

        let found = db.find(&Text::new("name"), &Value::String(Text::new("jeff"))).unwrap();
        assert!(found.contains(&PrimaryKey::new(1)));
    }

    #[test]
    fn select_groups_keys_visible_at_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
        db.acquire(write("age", "30", 1, Action::Add)).unwrap();

        let selected = db.select(PrimaryKey::new(1)).unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected[&Text::new("name")].contains(&Value::String(Text::new("jeff"))));
    }

    #[test]
    fn search_finds_tokens_indexed_across_buffer_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(crate::write::Write::new(
            Text::new("bio"),
            Value::String(Text::new("loves Rust code")),
            PrimaryKey::new(1),
            Action::Add,
            0,
            0,
        ))
        .unwrap();
        db.fsync().unwrap();

        let hits = db.search(&Text::new("bio"), "rust").unwrap();
        assert!(hits.contains(&PrimaryKey::new(1)));
    }

    #[test]
    fn audit_preserves_full_history_without_collapsing_parity() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
        db.acquire(write("name", "jeff", 1, Action::Remove)).unwrap();

        let history = db.audit(PrimaryKey::new(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].2, Action::Add);
        assert_eq!(history[1].2, Action::Remove);
    }

    #[test]
    fn fsync_moves_buffer_contents_into_a_reopenable_segment() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(dir.path());
            db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
            db.fsync().unwrap();
        }

        let reopened = open(dir.path());
        assert!(reopened
            .verify(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1), None)
            .unwrap());
    }

    #[test]
    fn compact_merges_the_oldest_pair_of_sealed_segments() {
        use crate::compaction::merge::MergeCompactor;

        let dir = tempfile::tempdir().unwrap();
        let db = open(dir.path());
        db.acquire(write("name", "jeff", 1, Action::Add)).unwrap();
        db.fsync().unwrap();
        db.acquire(write("name", "bob", 2, Action::Add)).unwrap();
        db.fsync().unwrap();

        assert_eq!(db.segments.len(), 2);
        assert!(db.compact(&MergeCompactor).unwrap());
        assert_eq!(db.segments.len(), 1);

        assert!(db
            .verify(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1), None)
            .unwrap());
        assert!(db
            .verify(&Text::new("name"), &Value::String(Text::new("bob")), PrimaryKey::new(2), None)
            .unwrap());
    }
}
