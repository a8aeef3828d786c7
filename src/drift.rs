//! Drift detection
//!
//! The detector compares the hash recorded in metadata against the hash of the
//! file currently on disk and classifies every path into exactly one
//! [`DriftStatus`]. Only [`DriftStatus::Unchanged`] files may be overwritten
//! silently; every other status means the caller must warn, skip, or ask.
//!
//! | Metadata | Record | File on disk | Status |
//! |---|---|---|---|
//! | absent | - | - | `NoMetadata` |
//! | present | absent | - | `UserAdded` |
//! | present | present | absent | `UserDeleted` |
//! | present | present | unreadable | `HashError` |
//! | present | present | different hash | `Modified` |
//! | present | present | same hash | `Unchanged` |
//!
//! The module also provides [`ContentPolicy`], the path-pattern classifier that
//! separates user content (never overwritten or backed up) from core content.

use crate::error::{DriftguardError, Result};
use crate::hasher::{hash_file, ContentHash};
use crate::metadata::MetadataStore;
use crate::types::Metadata;
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Drift classification of one tracked path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftStatus {
    /// File matches the recorded hash
    Unchanged,
    /// File content differs from what the engine wrote
    Modified {
        /// Hash in metadata
        recorded: ContentHash,
        /// Hash on disk
        current: ContentHash,
    },
    /// Metadata exists but has no record for the path
    UserAdded,
    /// Record exists but the file is gone
    UserDeleted,
    /// Metadata was never initialized for this root
    NoMetadata,
    /// File exists but could not be hashed
    HashError {
        /// Why hashing failed
        reason: String,
    },
}

impl DriftStatus {
    /// Whether an update may overwrite the file without asking
    pub fn is_safe_to_overwrite(&self) -> bool {
        matches!(self, DriftStatus::Unchanged)
    }

    /// Short snake_case label
    pub fn label(&self) -> &'static str {
        match self {
            DriftStatus::Unchanged => "unchanged",
            DriftStatus::Modified { .. } => "modified",
            DriftStatus::UserAdded => "user_added",
            DriftStatus::UserDeleted => "user_deleted",
            DriftStatus::NoMetadata => "no_metadata",
            DriftStatus::HashError { .. } => "hash_error",
        }
    }
}

/// Path patterns separating user content from core content
///
/// Patterns use glob syntax and match paths relative to the project root with
/// `/` separators. User patterns win over core patterns. With no core patterns,
/// every path that is not user content counts as core content.
///
/// ```rust
/// use driftguard::drift::ContentPolicy;
///
/// let policy = ContentPolicy::new(
///     &["specs/**".to_string(), "**/*.local.md".to_string()],
///     &[],
/// ).unwrap();
/// assert!(policy.is_user_content("specs/feature.md"));
/// assert!(policy.is_core_content("agents/reviewer.md"));
/// ```
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    user: GlobSet,
    core: Option<GlobSet>,
}

impl ContentPolicy {
    /// Build a policy from glob patterns
    ///
    /// # Errors
    ///
    /// [`DriftguardError::InvalidPattern`] if any pattern fails to parse.
    pub fn new(user_patterns: &[String], core_patterns: &[String]) -> Result<Self> {
        let user = build_globset(user_patterns)?;
        let core = if core_patterns.is_empty() {
            None
        } else {
            Some(build_globset(core_patterns)?)
        };
        Ok(Self { user, core })
    }

    /// Policy with no user content and everything core
    pub fn permissive() -> Self {
        Self {
            user: GlobSet::empty(),
            core: None,
        }
    }

    /// Whether `path` is user content
    pub fn is_user_content(&self, path: &str) -> bool {
        self.user.is_match(path)
    }

    /// Whether the engine may manage `path`
    pub fn is_core_content(&self, path: &str) -> bool {
        if self.is_user_content(path) {
            return false;
        }
        match &self.core {
            Some(core) => core.is_match(path),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| DriftguardError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DriftguardError::InvalidPattern(e.to_string()))
}

/// Classifies tracked files against their recorded hashes
#[derive(Debug, Clone)]
pub struct DriftDetector {
    store: MetadataStore,
}

impl DriftDetector {
    /// Create a detector reading metadata from `store`
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Classify one relative path
    ///
    /// # Errors
    ///
    /// Only metadata failures ([`DriftguardError::CorruptMetadata`], read errors)
    /// and unsafe paths are errors; an unhashable file is [`DriftStatus::HashError`].
    pub fn classify(&self, path: &str) -> Result<DriftStatus> {
        let metadata = self.store.load()?;
        self.classify_with(metadata.as_ref(), path)
    }

    /// Classify one relative path against already loaded metadata
    pub fn classify_with(&self, metadata: Option<&Metadata>, path: &str) -> Result<DriftStatus> {
        let full_path = utils::join_relative(&self.store.config().root, path)?;

        let Some(metadata) = metadata else {
            return Ok(DriftStatus::NoMetadata);
        };
        let Some(record) = metadata.record(path) else {
            return Ok(DriftStatus::UserAdded);
        };

        // symlink_metadata so a dangling link still counts as present
        if full_path.symlink_metadata().is_err() {
            return Ok(DriftStatus::UserDeleted);
        }

        let status = match hash_file(&full_path) {
            Ok(current) if current == record.hash => DriftStatus::Unchanged,
            Ok(current) => DriftStatus::Modified {
                recorded: record.hash.clone(),
                current,
            },
            Err(e) => {
                warn!("Could not hash {:?}: {}", full_path, e);
                DriftStatus::HashError { reason: e.to_string() }
            }
        };
        trace!("{} is {}", path, status.label());
        Ok(status)
    }

    /// Classify every tracked path
    ///
    /// Returns an empty map when metadata was never initialized.
    pub fn classify_all(&self) -> Result<BTreeMap<String, DriftStatus>> {
        let Some(metadata) = self.store.load()? else {
            return Ok(BTreeMap::new());
        };
        let mut statuses = BTreeMap::new();
        for path in metadata.files.keys() {
            let status = self.classify_with(Some(&metadata), path)?;
            statuses.insert(path.clone(), status);
        }
        debug!("Classified {} tracked files", statuses.len());
        Ok(statuses)
    }

    /// Find files under the root that have no metadata record
    ///
    /// The tool directory is skipped. Paths are returned sorted.
    pub fn find_untracked(&self) -> Result<Vec<String>> {
        let config = self.store.config();
        let metadata = self.store.load()?;
        let root = &config.root;
        let mut untracked = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() != 1 || entry.file_name() != config.tool_dir.as_str()
            });

        for entry in walker {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io_err) => DriftguardError::from_io(io_err, root),
                None => DriftguardError::internal("filesystem loop while scanning root"),
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = utils::make_relative(entry.path(), root)?;
            let key = utils::to_key(&relative);
            let tracked = metadata.as_ref().is_some_and(|m| m.record(&key).is_some());
            if !tracked {
                untracked.push(key);
            }
        }
        Ok(untracked)
    }
}
