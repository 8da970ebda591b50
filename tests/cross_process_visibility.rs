// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Spec E7: a writer appends N strings and seals them; a second handle
//! that reopens the same directory observes all N, in insertion order.

use concourse_kernel::{Action, Database, KernelConfig, PrimaryKey, StdFileSystem, Text, Value, Write};

const N: u64 = 50;

#[test]
fn a_reopened_database_observes_every_sealed_write_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = KernelConfig::new(dir.path());

    let writer: Database<StdFileSystem> = Database::open(&config).unwrap();
    for i in 0..N {
        writer
            .acquire(Write::new(
                Text::new("name"),
                Value::String(Text::new(format!("entry-{i}"))),
                PrimaryKey::new(i),
                Action::Add,
                0,
                0,
            ))
            .unwrap();
    }
    writer.fsync().unwrap();
    drop(writer);

    let reader: Database<StdFileSystem> = Database::open(&config).unwrap();
    let records = reader.iterate().unwrap();
    assert_eq!(records.len(), N as usize);

    for i in 0..N {
        let selected = reader.select(PrimaryKey::new(i)).unwrap();
        let values = &selected[&Text::new("name")];
        assert!(values.contains(&Value::String(Text::new(format!("entry-{i}")))));
    }
}
