// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{PrimaryKey, Text};
use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    hash::{fingerprint_bytes, Fingerprint},
    Slice,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const TAG_INTEGER: u8 = 0;
const TAG_DOUBLE: u8 = 1;
const TAG_BOOLEAN: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_TAG: u8 = 4;
const TAG_LINK: u8 = 5;
const TAG_BLOB: u8 = 6;

/// A tagged union over the value types a record's field can hold
/// (spec §3).
///
/// `String` and `Tag` carry the same payload shape (UTF-8 text) but are
/// distinct variants: the spec calls for them to fingerprint equally for
/// search/index purposes, while remaining distinct under primary equality.
#[derive(Clone, Debug)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Double(f64),
    /// A boolean.
    Boolean(bool),
    /// A plain UTF-8 string.
    String(Text),
    /// A UTF-8 string tagged so it fingerprints with `String` but never
    /// compares equal to one.
    Tag(Text),
    /// A reference to another record.
    Link(PrimaryKey),
    /// An opaque byte blob.
    Blob(Slice),
}

/// A value narrowed to its canonical numeric representation, used so that
/// `Integer(18)` and `Double(18.0)` fingerprint and order identically
/// (spec §4.2 "Ordering & tie-breaks").
#[derive(Copy, Clone, Debug)]
enum NumericForm {
    Int(i64),
    Float(f64),
}

fn narrow(value: &Value) -> Option<NumericForm> {
    match value {
        Value::Integer(i) => Some(NumericForm::Int(*i)),
        #[allow(clippy::cast_possible_truncation)]
        Value::Double(d) => {
            if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                Some(NumericForm::Int(*d as i64))
            } else {
                Some(NumericForm::Float(*d))
            }
        }
        _ => None,
    }
}

/// Compares two narrowed numeric forms. Mixed `Int`/`Float` comparisons
/// promote the integer to `f64`, which is exact for magnitudes up to 2^53
/// and an accepted, documented precision tradeoff beyond that (see
/// `DESIGN.md`).
fn numeric_cmp(a: NumericForm, b: NumericForm) -> std::cmp::Ordering {
    #[allow(clippy::cast_precision_loss)]
    match (a, b) {
        (NumericForm::Int(x), NumericForm::Int(y)) => x.cmp(&y),
        (NumericForm::Float(x), NumericForm::Float(y)) => x.total_cmp(&y),
        (NumericForm::Int(x), NumericForm::Float(y)) => (x as f64).total_cmp(&y),
        (NumericForm::Float(x), NumericForm::Int(y)) => x.total_cmp(&(y as f64)),
    }
}

fn numeric_fingerprint_bytes(form: NumericForm) -> Vec<u8> {
    match form {
        NumericForm::Int(i) => {
            let mut v = vec![0u8];
            v.extend_from_slice(&i.to_be_bytes());
            v
        }
        NumericForm::Float(f) => {
            let mut v = vec![1u8];
            v.extend_from_slice(&f.to_bits().to_be_bytes());
            v
        }
    }
}

impl Value {
    /// Returns the wire tag byte for this variant (spec §6).
    fn tag(&self) -> u8 {
        match self {
            Self::Integer(_) => TAG_INTEGER,
            Self::Double(_) => TAG_DOUBLE,
            Self::Boolean(_) => TAG_BOOLEAN,
            Self::String(_) => TAG_STRING,
            Self::Tag(_) => TAG_TAG,
            Self::Link(_) => TAG_LINK,
            Self::Blob(_) => TAG_BLOB,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Integer(i) => i.to_be_bytes().to_vec(),
            Self::Double(d) => d.to_bits().to_be_bytes().to_vec(),
            Self::Boolean(b) => vec![u8::from(*b)],
            Self::String(t) | Self::Tag(t) => t.as_str().as_bytes().to_vec(),
            Self::Link(p) => p.into_u64().to_be_bytes().to_vec(),
            Self::Blob(b) => b.to_vec(),
        }
    }

    /// Normalized bytes used for fingerprinting: numeric variants
    /// narrow to their canonical form, and `String`/`Tag` collapse onto
    /// the same class so they fingerprint equally.
    fn normalized_fingerprint_bytes(&self) -> Vec<u8> {
        if let Some(form) = narrow(self) {
            let mut v = vec![b'N'];
            v.extend(numeric_fingerprint_bytes(form));
            return v;
        }

        match self {
            Self::String(t) | Self::Tag(t) => {
                let mut v = vec![b'S'];
                v.extend_from_slice(t.as_str().as_bytes());
                v
            }
            Self::Boolean(b) => vec![b'B', u8::from(*b)],
            Self::Link(p) => {
                let mut v = vec![b'L'];
                v.extend_from_slice(&p.into_u64().to_be_bytes());
                v
            }
            Self::Blob(b) => {
                let mut v = vec![b'X'];
                v.extend_from_slice(b);
                v
            }
            Self::Integer(_) | Self::Double(_) => unreachable!("handled by narrow()"),
        }
    }

    /// Fingerprints the value for use as an index/search key or bloom
    /// filter entry (spec §4.2, §8 E5).
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_bytes(&self.normalized_fingerprint_bytes())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::String(t) => write!(f, "{t}"),
            Self::Tag(t) => write!(f, "{t}"),
            Self::Link(p) => write!(f, "@{p}"),
            Self::Blob(b) => write!(f, "[ {} bytes ]", b.len()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Tag(a), Self::Tag(b)) => a == b,
            (Self::Link(a), Self::Link(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a.as_ref() == b.as_ref(),
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Rank used to order across variant classes. Numeric variants
/// (`Integer`/`Double`) share a class so they interleave by value; the same
/// holds for `String`/`Tag`.
fn class_rank(value: &Value) -> u8 {
    match value {
        Value::Boolean(_) => 0,
        Value::Integer(_) | Value::Double(_) => 1,
        Value::String(_) | Value::Tag(_) => 2,
        Value::Link(_) => 3,
        Value::Blob(_) => 4,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (ra, rb) = (class_rank(self), class_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }

        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Link(a), Self::Link(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.as_ref().cmp(b.as_ref()),
            // `String` and `Tag` share an ordering on their text, but stay
            // distinct under `Eq`: tie-break on the variant tag so `cmp`
            // never reports `Equal` for a pair `eq` reports as unequal.
            (Self::String(a), Self::String(b))
            | (Self::String(a), Self::Tag(b))
            | (Self::Tag(a), Self::String(b))
            | (Self::Tag(a), Self::Tag(b)) => a.cmp(b).then_with(|| self.tag().cmp(&other.tag())),
            _ => {
                #[allow(clippy::expect_used)]
                let (na, nb) = (
                    narrow(self).expect("numeric class"),
                    narrow(other).expect("numeric class"),
                );
                // Same tie-break for `Integer`/`Double`: numeric-equal but
                // different variants must not collapse to `Equal`.
                numeric_cmp(na, nb).then_with(|| self.tag().cmp(&other.tag()))
            }
        }
    }
}

impl Encode for Value {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let payload = self.payload();

        #[allow(clippy::expect_used)]
        let len: u32 = payload.len().try_into().expect("value payload too long");

        writer.write_u8(self.tag())?;
        writer.write_u32::<BigEndian>(len)?;
        writer.write_all(&payload)?;
        Ok(())
    }
}

impl Decode for Value {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        let len = reader.read_u32::<BigEndian>()? as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        Ok(match tag {
            TAG_INTEGER => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&payload);
                Self::Integer(i64::from_be_bytes(buf))
            }
            TAG_DOUBLE => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&payload);
                Self::Double(f64::from_bits(u64::from_be_bytes(buf)))
            }
            TAG_BOOLEAN => Self::Boolean(payload.first() == Some(&1)),
            TAG_STRING => {
                std::str::from_utf8(&payload)?;
                Self::String(Text::new(payload.as_slice()))
            }
            TAG_TAG => {
                std::str::from_utf8(&payload)?;
                Self::Tag(Text::new(payload.as_slice()))
            }
            TAG_LINK => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&payload);
                Self::Link(PrimaryKey::new(u64::from_be_bytes(buf)))
            }
            TAG_BLOB => Self::Blob(payload.into()),
            other => return Err(DecodeError::InvalidTag(("Value", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn value_round_trip_all_variants() {
        let values = vec![
            Value::Integer(18),
            Value::Double(18.5),
            Value::Boolean(true),
            Value::String(Text::new("foo")),
            Value::Tag(Text::new("foo")),
            Value::Link(PrimaryKey::new(9)),
            Value::Blob(Slice::from(vec![1, 2, 3])),
        ];

        for value in values {
            let bytes = value.encode_into_vec();
            let decoded = Value::decode_from(&mut &bytes[..]).unwrap();
            assert_eq!(value, decoded);
        }
    }

    /// Spec §4.2 / §8 E5: `int(18)` and `double(18.0)` fingerprint equally.
    #[test]
    fn integer_and_double_fingerprint_equal() {
        assert_eq!(
            Value::Integer(18).fingerprint(),
            Value::Double(18.0).fingerprint()
        );
    }

    #[test]
    fn integer_and_double_are_not_equal_values() {
        assert_ne!(Value::Integer(18), Value::Double(18.0));
    }

    #[test]
    fn string_and_tag_fingerprint_equal_but_not_eq() {
        let s = Value::String(Text::new("foo"));
        let t = Value::Tag(Text::new("foo"));
        assert_eq!(s.fingerprint(), t.fingerprint());
        assert_ne!(s, t);
    }

    #[test]
    fn distinct_numbers_fingerprint_differently() {
        assert_ne!(Value::Integer(18).fingerprint(), Value::Double(625.0).fingerprint());
    }

    #[test]
    fn numeric_values_order_by_magnitude() {
        assert!(Value::Integer(18) < Value::Double(625.0));
        assert!(Value::Double(18.0) < Value::Integer(19));
    }

    /// `cmp() == Equal` must imply `==`, even across variants that narrow
    /// to the same numeric or textual form.
    #[test]
    fn ord_never_reports_equal_for_values_that_are_not_eq() {
        let pairs = [
            (Value::Integer(18), Value::Double(18.0)),
            (Value::String(Text::new("foo")), Value::Tag(Text::new("foo"))),
        ];
        for (a, b) in pairs {
            assert_ne!(a, b);
            assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);
            assert_ne!(b.cmp(&a), std::cmp::Ordering::Equal);
            assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }
    }
}
