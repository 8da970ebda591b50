// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    fingerprint::Byteable,
    hash::{fingerprint_bytes, Fingerprint},
    Slice,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// A UTF-8 string atom, stored as `[length:u32][utf8]` on disk (spec §6).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Text(Slice);

impl Text {
    /// Wraps a UTF-8 string.
    #[must_use]
    pub fn new<S: Into<Slice>>(value: S) -> Self {
        Self(value.into())
    }

    /// Borrows the underlying string slice.
    ///
    /// # Panics
    ///
    /// Panics if the backing bytes are not valid UTF-8. This cannot happen
    /// for any `Text` constructed through [`Text::new`] or [`Text::decode_from`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        #[allow(clippy::expect_used)]
        std::str::from_utf8(&self.0).expect("Text always holds valid UTF-8")
    }

    /// Returns the length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fingerprints the atom's bytes directly (spec §3: every atom
    /// hashes deterministically).
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_bytes(&self.0)
    }
}

impl Byteable for Text {
    fn as_fingerprint_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Text {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Encode for Text {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        #[allow(clippy::expect_used)]
        let len: u32 = self.0.len().try_into().expect("Text exceeds u32 length");
        writer.write_u32::<BigEndian>(len)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl Decode for Text {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u32::<BigEndian>()? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        std::str::from_utf8(&buf)?;
        Ok(Self(buf.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn text_round_trip() {
        let text = Text::new("hello concourse");
        let bytes = text.encode_into_vec();
        let decoded = Text::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(text, decoded);
    }

    #[test]
    fn text_orders_lexicographically() {
        assert!(Text::new("a") < Text::new("b"));
        assert!(Text::new("abc") < Text::new("abd"));
    }

    #[test]
    fn text_fingerprint_is_stable() {
        assert_eq!(Text::new("k").fingerprint(), Text::new("k").fingerprint());
    }
}
