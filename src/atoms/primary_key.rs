// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    hash::Fingerprint,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// An unsigned 64-bit record identifier (spec §2.1, §3).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PrimaryKey(u64);

impl PrimaryKey {
    /// Wraps a raw record id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw record id.
    #[must_use]
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Fingerprints the atom.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        crate::fingerprint::Composite::of(&[self.0.to_be_bytes().as_slice()])
    }
}

impl From<u64> for PrimaryKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for PrimaryKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.0)?;
        Ok(())
    }
}

impl Decode for PrimaryKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self(reader.read_u64::<BigEndian>()?))
    }
}
