// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width, self-describing byte-level atoms (spec §2.1, §3).
//!
//! Every atom hashes and orders deterministically: `Text`, `Value`,
//! `PrimaryKey` and `Position`.

mod position;
mod primary_key;
mod text;
mod value;

pub use position::Position;
pub use primary_key::PrimaryKey;
pub use text::Text;
pub use value::Value;
