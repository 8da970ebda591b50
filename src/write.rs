// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    action::Action,
    atoms::{PrimaryKey, Text, Value},
    coding::{Decode, DecodeError, Encode, EncodeError},
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write as IoWrite};

/// A single `(key, value, record)` ingestion record, tagged with an
/// [`Action`], a wall-clock `timestamp` and a monotonically increasing
/// `version` (spec §3).
///
/// Immutable once constructed. Equality compares `(key, value, record,
/// action, version)` — the timestamp is informational and does not
/// participate in identity.
#[derive(Clone, Debug)]
pub struct Write {
    key: Text,
    value: Value,
    record: PrimaryKey,
    action: Action,
    timestamp: u64,
    version: u64,
}

impl Write {
    /// Builds a write. `version` is normally assigned by the
    /// [`crate::buffer::Buffer`] on insertion; constructing one directly
    /// with an explicit version is primarily useful for tests and for
    /// chunk/revision deserialization.
    #[must_use]
    pub fn new(
        key: Text,
        value: Value,
        record: PrimaryKey,
        action: Action,
        timestamp: u64,
        version: u64,
    ) -> Self {
        Self {
            key,
            value,
            record,
            action,
            timestamp,
            version,
        }
    }

    #[must_use]
    pub fn key(&self) -> &Text {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn record(&self) -> PrimaryKey {
        self.record
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns a copy of this write with `action` replaced by its
    /// inverse, preserving `(key, value, record)` — used to build the
    /// opposing `REMOVE` half of an `ADD`/`REMOVE` pair in tests.
    #[must_use]
    pub fn inverted(&self, timestamp: u64, version: u64) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            record: self.record,
            action: self.action.inverse(),
            timestamp,
            version,
        }
    }

    /// Whether this write matches the `(key, value, record)` template of
    /// `other`, ignoring action, timestamp and version.
    #[must_use]
    pub fn matches(&self, key: &Text, value: &Value, record: PrimaryKey) -> bool {
        &self.key == key && &self.value == value && self.record == record
    }
}

impl PartialEq for Write {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.record == other.record
            && self.action == other.action
            && self.version == other.version
    }
}

impl Eq for Write {}

impl Encode for Write {
    fn encode_into<W: IoWrite>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.key.encode_into(writer)?;
        self.value.encode_into(writer)?;
        self.record.encode_into(writer)?;
        self.action.encode_into(writer)?;
        writer.write_u64::<BigEndian>(self.timestamp)?;
        writer.write_u64::<BigEndian>(self.version)?;
        Ok(())
    }
}

impl Decode for Write {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let key = Text::decode_from(reader)?;
        let value = Value::decode_from(reader)?;
        let record = PrimaryKey::decode_from(reader)?;
        let action = Action::decode_from(reader)?;
        let timestamp = reader.read_u64::<BigEndian>()?;
        let version = reader.read_u64::<BigEndian>()?;
        Ok(Self {
            key,
            value,
            record,
            action,
            timestamp,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> Write {
        Write::new(
            Text::new("name"),
            Value::String(Text::new("jeff")),
            PrimaryKey::new(1),
            Action::Add,
            100,
            1,
        )
    }

    #[test]
    fn write_round_trip() {
        let w = sample();
        let bytes = w.encode_into_vec();
        assert_eq!(w, Write::decode_from(&mut &bytes[..]).unwrap());
    }

    #[test]
    fn equality_ignores_timestamp() {
        let a = sample();
        let b = Write::new(
            Text::new("name"),
            Value::String(Text::new("jeff")),
            PrimaryKey::new(1),
            Action::Add,
            999,
            1,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn equality_considers_action_and_version() {
        let a = sample();
        let removed = a.inverted(200, 2);
        assert_ne!(a, removed);
    }

    #[test]
    fn matches_checks_key_value_record_only() {
        let w = sample();
        assert!(w.matches(&Text::new("name"), &Value::String(Text::new("jeff")), PrimaryKey::new(1)));
        assert!(!w.matches(&Text::new("name"), &Value::String(Text::new("bob")), PrimaryKey::new(1)));
    }
}
