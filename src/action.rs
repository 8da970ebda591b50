// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::ReadBytesExt;
use std::io::{Read, Write};

const TAG_ADD: u8 = 0;
const TAG_REMOVE: u8 = 1;

/// Whether a write adds or removes a (key, value) pair for a record
/// (spec §3).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    /// The value is being added to the record's key.
    Add,
    /// The value is being removed from the record's key.
    Remove,
}

impl Action {
    /// Returns the action that, applied after this one, cancels it out of
    /// the parity count (spec §3 I6: "an even number of writes for the same
    /// (key, value, record) ... leaves no visible trace").
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Add => Self::Remove,
            Self::Remove => Self::Add,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Remove => write!(f, "REMOVE"),
        }
    }
}

impl Encode for Action {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let tag = match self {
            Self::Add => TAG_ADD,
            Self::Remove => TAG_REMOVE,
        };
        writer.write_all(&[tag])?;
        Ok(())
    }
}

impl Decode for Action {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            TAG_ADD => Ok(Self::Add),
            TAG_REMOVE => Ok(Self::Remove),
            other => Err(DecodeError::InvalidTag(("Action", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn action_round_trip() {
        for action in [Action::Add, Action::Remove] {
            let bytes = action.encode_into_vec();
            assert_eq!(action, Action::decode_from(&mut &bytes[..]).unwrap());
        }
    }

    #[test]
    fn action_inverse_cancels() {
        assert_eq!(Action::Add.inverse(), Action::Remove);
        assert_eq!(Action::Remove.inverse(), Action::Add);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bytes = [9u8];
        assert!(Action::decode_from(&mut &bytes[..]).is_err());
    }
}
