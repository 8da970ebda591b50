// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Spec E2: transferring a large buffer into a segment preserves every
//! answer `verify` gave before the transfer, empties the buffer, and
//! replays the original writes in insertion order.

use concourse_kernel::{Action, Buffer, PrimaryKey, Segment, StdFileSystem, Text, Value, Write};

const WRITE_COUNT: u64 = 1_000;

fn seed(buffer: &Buffer) -> Vec<Write> {
    let mut writes = Vec::with_capacity(WRITE_COUNT as usize);
    for i in 0..WRITE_COUNT {
        let write = Write::new(
            Text::new("name"),
            Value::String(Text::new(format!("value-{i}"))),
            PrimaryKey::new(i),
            Action::Add,
            0,
            0,
        );
        buffer.insert(write.clone()).unwrap();
        writes.push(write);
    }
    writes
}

#[test]
fn transfer_preserves_verify_answers_and_replays_writes_in_order() {
    let buffer = Buffer::default();
    let writes = seed(&buffer);

    let before: Vec<bool> = writes
        .iter()
        .map(|w| buffer.verify(w.key(), w.value(), w.record(), None))
        .collect();

    let mut segment: Segment<StdFileSystem> = Segment::create(1);
    let count = buffer.transfer(&mut segment).unwrap();
    assert_eq!(count, WRITE_COUNT as usize);
    assert!(buffer.is_empty());

    let replayed = segment.writes().unwrap();
    assert_eq!(replayed.len(), WRITE_COUNT as usize);
    for (original, replayed) in writes.iter().zip(replayed.iter()) {
        assert_eq!(original.key(), replayed.key());
        assert_eq!(original.value(), replayed.value());
        assert_eq!(original.record(), replayed.record());
    }

    for (write, expected) in writes.iter().zip(before.iter()) {
        let occurrences = replayed
            .iter()
            .filter(|w| w.matches(write.key(), write.value(), write.record()))
            .count();
        let present = occurrences % 2 == 1;
        assert_eq!(present, *expected, "verify answer changed for {write:?}");
    }
}
