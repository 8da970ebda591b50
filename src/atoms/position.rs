// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::PrimaryKey;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A record plus a token offset within that record's indexed text
/// (spec §3: "`Position` records record and token offset").
///
/// Used as the value atom of [`crate::revision::SearchRevision`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Position {
    record: PrimaryKey,
    token_index: u32,
}

impl Position {
    /// Creates a position for `record` at `token_index`.
    #[must_use]
    pub fn new(record: PrimaryKey, token_index: u32) -> Self {
        Self { record, token_index }
    }

    /// The record this position refers to.
    #[must_use]
    pub fn record(&self) -> PrimaryKey {
        self.record
    }

    /// The zero-based token offset within the record's indexed text.
    #[must_use]
    pub fn token_index(&self) -> u32 {
        self.token_index
    }
}

impl Encode for Position {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.record.encode_into(writer)?;
        writer.write_u32::<BigEndian>(self.token_index)?;
        Ok(())
    }
}

impl Decode for Position {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let record = PrimaryKey::decode_from(reader)?;
        let token_index = reader.read_u32::<BigEndian>()?;
        Ok(Self { record, token_index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn position_round_trip() {
        let pos = Position::new(PrimaryKey::new(7), 3);
        let bytes = pos.encode_into_vec();
        assert_eq!(pos, Position::decode_from(&mut &bytes[..]).unwrap());
    }

    #[test]
    fn position_orders_by_record_then_token() {
        let a = Position::new(PrimaryKey::new(1), 9);
        let b = Position::new(PrimaryKey::new(2), 0);
        assert!(a < b);

        let c = Position::new(PrimaryKey::new(1), 0);
        let d = Position::new(PrimaryKey::new(1), 1);
        assert!(c < d);
    }
}
