// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A schemaless, versioned, transactional record storage kernel.
//!
//! Writes land in an in-memory, write-ahead [`buffer::Buffer`] and are
//! periodically drained into immutable, bloom-filtered [`segment::Segment`]s
//! (spec §4.1, §4.2, §4.5). Every write is keyed by a `(key, value, record)`
//! triple tagged `Action::Add`/`Action::Remove`; presence is the parity of
//! how many times that exact triple has been written (spec §3 I6). A
//! background [`compaction::worker::CompactionWorker`] periodically merges
//! adjacent segments under a pluggable [`compaction::CompactionPolicy`]
//! (spec §4.7). [`database::Database`] is the façade wiring all of this
//! together behind `acquire`/`verify`/`select`/`find`/`search`/`browse`/
//! `audit`/`iterate` and the administrative `compact`/`dump`/`fsync` (spec
//! §4.6).
//!
//! [`environment::Environment`] discovers one buffer/database directory
//! pair per tenant name for deployments that host more than one database
//! under shared roots (spec §6).

#![doc(html_logo_url = "https://raw.githubusercontent.com/cinchapi/concourse-kernel/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/cinchapi/concourse-kernel/main/logo.png")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod action;
mod atoms;
mod bloom;
mod buffer;
mod checksum;
mod chunk;
mod coding;
pub mod compaction;
mod config;
mod database;
mod environment;
mod error;
mod fingerprint;
mod fs;
mod hash;
mod manifest;
mod path;
mod revision;
mod schema_version;
mod segment;
mod segment_list;
mod shared_lock;
mod slice;
mod stop_signal;
mod time;
mod version_counter;
mod write;

pub use {
    action::Action,
    atoms::{Position, PrimaryKey, Text, Value},
    buffer::Buffer,
    checksum::Checksum,
    config::KernelConfig,
    database::{AuditEntry, Database},
    environment::Environment,
    error::{Error, Result},
    fs::{DirEntry, FileSystem, StdFileSystem},
    schema_version::SchemaVersion,
    segment::Segment,
    segment_list::SegmentList,
    shared_lock::SharedLock,
    slice::Slice,
    stop_signal::StopSignal,
    write::Write,
};
