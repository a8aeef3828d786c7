//! Canonical content for installs and updates
//!
//! The engine never generates file content itself. A [`ContentSource`] supplies
//! the package version and the bytes each managed path should hold; the engine
//! decides which of those paths it may write.

use crate::error::{DriftguardError, Result};
use crate::utils;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Supplier of canonical file content for one package version
pub trait ContentSource {
    /// Package version this content belongs to
    fn version(&self) -> &str;

    /// Relative `/`-separated paths this source provides, sorted
    fn paths(&self) -> Result<Vec<String>>;

    /// Full content of `path`
    ///
    /// Must also accept the normalized key of any path returned by `paths`.
    fn content(&self, path: &str) -> Result<Vec<u8>>;
}

/// Content held in memory
///
/// ```rust
/// use driftguard::source::{ContentSource, MemorySource};
///
/// let source = MemorySource::new("1.0.0")
///     .with_file("agents/reviewer.md", "# Reviewer\n")
///     .with_file("README.md", "hello");
/// assert_eq!(source.paths().unwrap(), vec!["README.md", "agents/reviewer.md"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    version: String,
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Empty source for `version`
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add or replace a file
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    /// Add or replace a file in place
    ///
    /// Safe paths are stored under their normalized key; unsafe ones are kept
    /// as given so planning rejects them.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        let key = utils::normalize_key(&path).unwrap_or(path);
        self.files.insert(key, content.into());
    }
}

impl ContentSource for MemorySource {
    fn version(&self) -> &str {
        &self.version
    }

    fn paths(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn content(&self, path: &str) -> Result<Vec<u8>> {
        let key = utils::normalize_key(path).unwrap_or_else(|_| path.to_string());
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| DriftguardError::FileNotFound { path: PathBuf::from(path) })
    }
}

/// Content read from a directory tree
///
/// Every regular file under the directory is provided, except leftover
/// temporary files and anything under an excluded top-level directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    version: String,
    excluded: Vec<String>,
}

impl DirectorySource {
    /// Source reading from `root`
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
            excluded: Vec::new(),
        }
    }

    /// Skip a top-level directory, such as a tool directory inside the package
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }

    /// Directory content is read from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentSource for DirectorySource {
    fn version(&self) -> &str {
        &self.version
    }

    fn paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() != 1
                    || !self
                        .excluded
                        .iter()
                        .any(|name| entry.file_name() == name.as_str())
            });

        for entry in walker {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io_err) => DriftguardError::from_io(io_err, &self.root),
                None => DriftguardError::internal("filesystem loop while reading source"),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if utils::is_temp_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let relative = utils::make_relative(entry.path(), &self.root)?;
            paths.push(utils::to_key(&relative));
        }
        debug!("Source {:?} provides {} files", self.root, paths.len());
        Ok(paths)
    }

    fn content(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = utils::join_relative(&self.root, path)?;
        fs::read(&full_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DriftguardError::FileNotFound { path: full_path },
            _ => DriftguardError::from_io(e, &full_path),
        })
    }
}
