// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The reference compaction policy: always triggers, always merges (spec
//! §8 E3).

use super::{CompactionPolicy, StorageContext};
use crate::{error::Result, fs::FileSystem, segment::Segment};

/// Merges any adjacent pair it is given into one segment holding the union
/// of their writes. No size heuristics, no skipped pairs: this is the
/// baseline strategy against which more selective policies are measured.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeCompactor;

impl<FS: FileSystem> CompactionPolicy<FS> for MergeCompactor {
    fn is_triggered(&self, _context: &StorageContext) -> bool {
        true
    }

    fn is_optimization_possible(&self, _context: &StorageContext, _a: &Segment<FS>, _b: &Segment<FS>) -> bool {
        true
    }

    fn compact(&self, a: &Segment<FS>, b: &Segment<FS>, next_id: u64) -> Result<Option<Segment<FS>>> {
        let mut merged = Segment::create(next_id);
        for write in a.writes()?.into_iter().chain(b.writes()?) {
            merged.acquire(&write)?;
        }
        Ok(Some(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        action::Action,
        atoms::{PrimaryKey, Text, Value},
        fs::StdFileSystem,
        write::Write as KernelWrite,
    };
    use test_log::test;

    fn write(key: &str, value: &str, record: u64, version: u64) -> KernelWrite {
        KernelWrite::new(
            Text::new(key),
            Value::String(Text::new(value)),
            PrimaryKey::new(record),
            Action::Add,
            0,
            version,
        )
    }

    /// Spec E3, single-pair case: the union of both segments' writes
    /// survives the merge.
    #[test]
    fn merges_two_segments_into_one_preserving_all_writes() {
        let mut a: Segment<StdFileSystem> = Segment::create(1);
        a.acquire(&write("name", "jeff", 1, 0)).unwrap();
        let mut b: Segment<StdFileSystem> = Segment::create(2);
        b.acquire(&write("name", "bob", 2, 1)).unwrap();

        let context = StorageContext {
            available_disk_space: u64::MAX,
            total_disk_space: u64::MAX,
            mutable_segments: 2,
        };
        let policy = MergeCompactor;
        assert!(CompactionPolicy::<StdFileSystem>::is_triggered(&policy, &context));
        assert!(CompactionPolicy::<StdFileSystem>::is_optimization_possible(
            &policy, &context, &a, &b
        ));

        let merged = policy.compact(&a, &b, 3).unwrap().unwrap();
        assert!(merged.is_mutable());
        let writes = merged.writes().unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes.contains(&write("name", "jeff", 1, 0)));
        assert!(writes.contains(&write("name", "bob", 2, 1)));
    }
}
