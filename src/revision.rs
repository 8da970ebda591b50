// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Chunk entries (spec §3 "Revision (chunk entry)").
//!
//! `Revision<L, K, V>` is parameterised over a locator, key and value atom.
//! The three chunk kinds are instantiations of this one shape:
//!
//! - [`PrimaryRevision`]: `L=PrimaryKey, K=Text, V=Value` — "record R, key k,
//!   value v existed (added/removed) at t".
//! - [`IndexRevision`]: `L=Text, K=Value, V=PrimaryKey` — inverted index for
//!   equality/range queries.
//! - [`SearchRevision`]: `L=Text, K=Text, V=Position` — inverted index for
//!   substring search.

use crate::{
    action::Action,
    atoms::{PrimaryKey, Position, Text, Value},
    coding::{Decode, DecodeError, Encode, EncodeError},
    fingerprint::Composite,
    hash::Fingerprint,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// An atom that can stand in as a [`Revision`]'s locator or key: it must be
/// totally ordered (I1) and reduce to a stable [`Fingerprint`] (spec §3
/// "Locator fingerprint").
pub trait Fingerprintable {
    /// Returns this atom's fingerprint.
    fn fingerprint(&self) -> Fingerprint;
}

impl Fingerprintable for PrimaryKey {
    fn fingerprint(&self) -> Fingerprint {
        PrimaryKey::fingerprint(self)
    }
}

impl Fingerprintable for Text {
    fn fingerprint(&self) -> Fingerprint {
        Text::fingerprint(self)
    }
}

impl Fingerprintable for Value {
    fn fingerprint(&self) -> Fingerprint {
        Value::fingerprint(self)
    }
}

/// Combines a locator fingerprint and a key fingerprint into the
/// fingerprint used for a manifest's locator+key entries (spec §4.3).
#[must_use]
pub fn composite_fingerprint_of(locator: Fingerprint, key: Fingerprint) -> Fingerprint {
    let mut composite = Composite::new();
    composite.push_fingerprint(locator);
    composite.push_fingerprint(key);
    composite.fingerprint()
}

/// One entry in a chunk: `(locator, key, value)` plus the `(timestamp,
/// version, action)` triple carried over from the source [`crate::write::Write`]
/// (spec §3).
#[derive(Clone, Debug)]
pub struct Revision<L, K, V> {
    locator: L,
    key: K,
    value: V,
    timestamp: u64,
    version: u64,
    action: Action,
}

impl<L, K, V> Revision<L, K, V>
where
    L: Fingerprintable + Ord + Clone,
    K: Fingerprintable + Ord + Clone,
    V: Ord + Clone,
{
    /// Builds a revision.
    #[must_use]
    pub fn new(locator: L, key: K, value: V, timestamp: u64, version: u64, action: Action) -> Self {
        Self {
            locator,
            key,
            value,
            timestamp,
            version,
            action,
        }
    }

    #[must_use]
    pub fn locator(&self) -> &L {
        &self.locator
    }

    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// Fingerprint of the locator alone, used for locator-only manifest
    /// entries and seeks (spec §4.3 "a locator (or composite locator+key)").
    #[must_use]
    pub fn locator_fingerprint(&self) -> Fingerprint {
        self.locator.fingerprint()
    }

    /// Fingerprint of `(locator, key)`, used for locator+key manifest
    /// entries and bloom filter keys (spec §4.4, §4.8).
    #[must_use]
    pub fn composite_fingerprint(&self) -> Fingerprint {
        composite_fingerprint_of(self.locator.fingerprint(), self.key.fingerprint())
    }

    /// The `(locator, key, value, version)` sort key required by I1.
    #[must_use]
    pub fn sort_key(&self) -> (L, K, V, u64) {
        (
            self.locator.clone(),
            self.key.clone(),
            self.value.clone(),
            self.version,
        )
    }
}

impl<L, K, V> PartialEq for Revision<L, K, V>
where
    L: PartialEq,
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
            && self.key == other.key
            && self.value == other.value
            && self.version == other.version
            && self.action == other.action
    }
}

impl<L, K, V> Eq for Revision<L, K, V>
where
    L: Eq,
    K: Eq,
    V: Eq,
{
}

impl<L, K, V> PartialOrd for Revision<L, K, V>
where
    L: Fingerprintable + Ord + Clone,
    K: Fingerprintable + Ord + Clone,
    V: Ord + Clone,
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<L, K, V> Ord for Revision<L, K, V>
where
    L: Fingerprintable + Ord + Clone,
    K: Fingerprintable + Ord + Clone,
    V: Ord + Clone,
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// The chunk entry shape for a primary chunk: "record R, key k, value v
/// existed (added/removed) at t".
pub type PrimaryRevision = Revision<PrimaryKey, Text, Value>;

/// The chunk entry shape for an inverted index chunk (equality/range
/// queries).
pub type IndexRevision = Revision<Text, Value, PrimaryKey>;

/// The chunk entry shape for a substring-search inverted index chunk.
pub type SearchRevision = Revision<Text, Text, Position>;

impl<L, K, V> Encode for Revision<L, K, V>
where
    L: Encode,
    K: Encode,
    V: Encode,
{
    /// Wire layout (spec §6): `[locator_bytes][key_bytes][value_bytes]
    /// [version:u64][timestamp:u64][action:u8]`.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.locator.encode_into(writer)?;
        self.key.encode_into(writer)?;
        self.value.encode_into(writer)?;
        writer.write_u64::<BigEndian>(self.version)?;
        writer.write_u64::<BigEndian>(self.timestamp)?;
        self.action.encode_into(writer)?;
        Ok(())
    }
}

impl<L, K, V> Decode for Revision<L, K, V>
where
    L: Decode,
    K: Decode,
    V: Decode,
{
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let locator = L::decode_from(reader)?;
        let key = K::decode_from(reader)?;
        let value = V::decode_from(reader)?;
        let version = reader.read_u64::<BigEndian>()?;
        let timestamp = reader.read_u64::<BigEndian>()?;
        let action = Action::decode_from(reader)?;
        Ok(Self {
            locator,
            key,
            value,
            timestamp,
            version,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn primary_revision_round_trip() {
        let rev = PrimaryRevision::new(
            PrimaryKey::new(1),
            Text::new("name"),
            Value::String(Text::new("jeff")),
            100,
            1,
            Action::Add,
        );
        let bytes = rev.encode_into_vec();
        let decoded = PrimaryRevision::decode_from(&mut &bytes[..]).unwrap();
        assert_eq!(rev, decoded);
    }

    #[test]
    fn index_revision_composite_fingerprint_matches_for_equivalent_values() {
        let a = IndexRevision::new(
            Text::new("payRangeMax"),
            Value::Integer(18),
            PrimaryKey::new(1),
            0,
            0,
            Action::Add,
        );
        let b = IndexRevision::new(
            Text::new("payRangeMax"),
            Value::Double(18.0),
            PrimaryKey::new(1),
            0,
            1,
            Action::Add,
        );
        assert_eq!(a.composite_fingerprint(), b.composite_fingerprint());
    }

    #[test]
    fn index_revision_composite_fingerprint_differs_for_distinct_values() {
        let a = IndexRevision::new(
            Text::new("payRangeMax"),
            Value::Integer(18),
            PrimaryKey::new(1),
            0,
            0,
            Action::Add,
        );
        let b = IndexRevision::new(
            Text::new("payRangeMax"),
            Value::Double(625.0),
            PrimaryKey::new(1),
            0,
            1,
            Action::Add,
        );
        assert_ne!(a.composite_fingerprint(), b.composite_fingerprint());
    }

    #[test]
    fn sorts_by_locator_then_key_then_value_then_version() {
        let mut revisions = vec![
            PrimaryRevision::new(
                PrimaryKey::new(2),
                Text::new("name"),
                Value::String(Text::new("a")),
                0,
                0,
                Action::Add,
            ),
            PrimaryRevision::new(
                PrimaryKey::new(1),
                Text::new("name"),
                Value::String(Text::new("b")),
                0,
                1,
                Action::Add,
            ),
            PrimaryRevision::new(
                PrimaryKey::new(1),
                Text::new("age"),
                Value::Integer(30),
                0,
                2,
                Action::Add,
            ),
        ];
        revisions.sort();

        assert_eq!(revisions[0].locator(), &PrimaryKey::new(1));
        assert_eq!(revisions[0].key(), &Text::new("age"));
        assert_eq!(revisions[1].locator(), &PrimaryKey::new(1));
        assert_eq!(revisions[1].key(), &Text::new("name"));
        assert_eq!(revisions[2].locator(), &PrimaryKey::new(2));
    }
}
