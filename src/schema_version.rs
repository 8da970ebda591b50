// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Spec §6 hints at a schema version field without pinning its semantics.
//! We fix a single numeric schema version and refuse to load anything else,
//! per spec §9's open question.

/// On-disk segment schema version.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchemaVersion {
    /// The only schema version this kernel can read or write.
    V1,
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl From<SchemaVersion> for u32 {
    fn from(value: SchemaVersion) -> Self {
        match value {
            SchemaVersion::V1 => 1,
        }
    }
}

impl TryFrom<u32> for SchemaVersion {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            _ => Err(()),
        }
    }
}

/// Current schema version written by this kernel.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion::V1;

/// Current on-disk format version (segment file layout revision, spec §6).
pub const CURRENT_FORMAT_VERSION: u16 = 1;
