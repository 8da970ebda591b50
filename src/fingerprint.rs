// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Composite fingerprints (spec §4.8).
//!
//! A `Composite` concatenates one or more [`Byteable`] parts, length-prefixing
//! each one, before hashing the result. Length-prefixing is what keeps
//! `Composite("a", "b")` distinct from `Composite("ab")` (spec invariant I7):
//! without it, `("a","b")` and `("ab",)` would hash identically.

use crate::hash::{fingerprint_bytes, Fingerprint};
use byteorder::{BigEndian, WriteBytesExt};

/// Anything that can contribute its canonical byte representation to a
/// [`Composite`] fingerprint.
pub trait Byteable {
    /// Returns the canonical bytes used for fingerprinting.
    fn as_fingerprint_bytes(&self) -> &[u8];
}

impl Byteable for [u8] {
    fn as_fingerprint_bytes(&self) -> &[u8] {
        self
    }
}

impl Byteable for str {
    fn as_fingerprint_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// A length-prefixed, multi-part byte fingerprint (spec §4.8).
#[derive(Debug, Default, Clone)]
pub struct Composite {
    buf: Vec<u8>,
}

impl Composite {
    /// Starts an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a part, framed as `[len:u32][bytes]`.
    ///
    /// # Panics
    ///
    /// Panics if `part` is longer than `u32::MAX` bytes.
    pub fn push<B: Byteable + ?Sized>(&mut self, part: &B) -> &mut Self {
        let bytes = part.as_fingerprint_bytes();

        #[allow(clippy::expect_used)]
        let len: u32 = bytes.len().try_into().expect("composite part too long");

        #[allow(clippy::expect_used)]
        self.buf
            .write_u32::<BigEndian>(len)
            .expect("writing into a Vec cannot fail");
        self.buf.extend_from_slice(bytes);

        self
    }

    /// Builds a composite fingerprint from a fixed set of parts in one call.
    #[must_use]
    pub fn of<B: Byteable + ?Sized>(parts: &[&B]) -> Fingerprint {
        let mut composite = Self::new();
        for part in parts {
            composite.push(*part);
        }
        composite.fingerprint()
    }

    /// Appends an already-computed fingerprint as a fixed-width 16-byte
    /// part, framed the same as any other part.
    pub fn push_fingerprint(&mut self, value: Fingerprint) -> &mut Self {
        self.push(value.into_u128().to_be_bytes().as_slice())
    }

    /// Computes the fingerprint of the parts pushed so far.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_bytes(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    /// Spec §8 E6: `Composite("iqu") != Composite("iq", "u")`.
    #[test]
    fn composite_uniqueness_iqu() {
        let one_part = Composite::of(&["iqu"]);
        let two_parts = Composite::of(&["iq", "u"]);
        assert_ne!(one_part, two_parts);
    }

    /// Spec §8 E6 (second vector): an arbitrary pre-framed byte buffer that
    /// was not built via per-part length prefixing must not collide with
    /// the canonically-framed `Composite("a", "b")`.
    #[test]
    fn composite_uniqueness_raw_buffer() {
        // Mimics an internal pre-encoded buffer (e.g. an int tag plus two
        // unframed strings) rather than going through `Composite::push`.
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(b"a");
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(b"b");

        let raw_fingerprint = fingerprint_bytes(&raw);
        let framed_fingerprint = Composite::of(&["a", "b"]);

        assert_ne!(raw_fingerprint, framed_fingerprint);
    }

    #[test]
    fn composite_is_order_sensitive() {
        assert_ne!(Composite::of(&["a", "b"]), Composite::of(&["b", "a"]));
    }

    #[test]
    fn composite_concatenation_does_not_collide() {
        // I7: Composite(a,b) never collides with Composite(ab).
        assert_ne!(Composite::of(&["a", "b"]), Composite::of(&["ab"]));
    }
}
