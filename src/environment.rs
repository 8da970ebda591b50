// Copyright (c) 2024-present, concourse-kernel contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Multi-environment discovery (spec §6: "each environment is a subdirectory
//! under the buffer and database roots").
//!
//! This kernel is multi-tenant at the filesystem level: a buffer root and a
//! database root each hold one subdirectory per environment, named
//! identically across both roots. [`Environment::discover`] finds the
//! intersection and yields a handle per environment with both of its paths
//! resolved, ready to be opened as a [`crate::database::Database`].

use crate::{
    error::Result,
    fs::FileSystem,
};
use std::{
    collections::BTreeSet,
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// One discovered environment: a name shared by a subdirectory of the
/// buffer root and of the database root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment<FS: FileSystem> {
    name: String,
    buffer_dir: PathBuf,
    database_dir: PathBuf,
    _fs: PhantomData<FS>,
}

impl<FS: FileSystem> Environment<FS> {
    /// The environment's name (its subdirectory name under both roots).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This environment's buffer subdirectory.
    #[must_use]
    pub fn buffer_dir(&self) -> &Path {
        &self.buffer_dir
    }

    /// This environment's database subdirectory.
    #[must_use]
    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    /// Scans `buffer_root` and `database_root` for matching subdirectory
    /// names and returns one [`Environment`] per name present under both.
    /// Names present under only one root are skipped: an environment isn't
    /// usable until both of its directories exist.
    ///
    /// # Errors
    ///
    /// Propagates an I/O error from listing either root.
    pub fn discover(buffer_root: &Path, database_root: &Path) -> Result<Vec<Self>> {
        let buffer_names = subdirectory_names::<FS>(buffer_root)?;
        let database_names = subdirectory_names::<FS>(database_root)?;

        Ok(buffer_names
            .intersection(&database_names)
            .map(|name| Self {
                name: name.clone(),
                buffer_dir: buffer_root.join(name),
                database_dir: database_root.join(name),
                _fs: PhantomData,
            })
            .collect())
    }
}

fn subdirectory_names<FS: FileSystem>(root: &Path) -> Result<BTreeSet<String>> {
    if !FS::exists(root)? {
        return Ok(BTreeSet::new());
    }

    Ok(FS::read_dir(root)?
        .into_iter()
        .filter(crate::fs::DirEntry::is_dir)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn discovers_only_names_present_under_both_roots() {
        let dir = tempfile::tempdir().unwrap();
        let buffer_root = dir.path().join("buffer");
        let database_root = dir.path().join("db");
        std::fs::create_dir_all(buffer_root.join("prod")).unwrap();
        std::fs::create_dir_all(buffer_root.join("orphan_buffer_only")).unwrap();
        std::fs::create_dir_all(database_root.join("prod")).unwrap();
        std::fs::create_dir_all(database_root.join("orphan_db_only")).unwrap();

        let environments = Environment::<StdFileSystem>::discover(&buffer_root, &database_root).unwrap();

        assert_eq!(environments.len(), 1);
        assert_eq!(environments[0].name(), "prod");
    }

    #[test]
    fn missing_roots_discover_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let environments =
            Environment::<StdFileSystem>::discover(&dir.path().join("nope"), &dir.path().join("also-nope")).unwrap();
        assert!(environments.is_empty());
    }
}
