//! Core data types used throughout the Driftguard library
//!
//! This module contains the data structures shared across components.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Persisted State**: `Metadata`, `FileRecord`, `BackupManifest` - the JSON documents on disk
//! - **Operations**: `TransactionOperation`, `WriteOptions`, `UpdateOptions` - operation inputs
//! - **Results**: `TransactionResult`, `BackupOutcome`, `RestoreResult` - outcomes with secondary failures
//! - **Configuration**: `EngineConfig` - where everything lives under a project root
//! - **Hooks**: `WriteHook` - extensibility points around staging and committing
//!
//! ## Examples
//!
//! ```rust
//! use driftguard::types::{Encoding, TransactionOperation};
//!
//! let op = TransactionOperation::text("docs/guide.md", "# Guide\n");
//! assert_eq!(op.encoding, Encoding::Utf8);
//! ```

use crate::error::{DriftguardError, FileFailure, Result};
use crate::hasher::ContentHash;
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Provenance of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    /// Written by the engine from canonical content
    #[default]
    Managed,
    /// Provenance not recognized
    #[serde(other)]
    Unknown,
}

/// Record of one file the engine owns, keyed by its path relative to the project root
///
/// A record exists for a path iff the engine wrote that path's last known content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Digest of the content the engine last wrote
    pub hash: ContentHash,
    /// Provenance tag
    #[serde(default)]
    pub source: FileSource,
    /// When the file was first written
    pub installed_at: DateTime<Utc>,
    /// When the file was last overwritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Version that last overwrote the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_to_version: Option<String>,
}

impl FileRecord {
    /// Create a record for a freshly installed file
    pub fn new(hash: ContentHash) -> Self {
        Self {
            hash,
            source: FileSource::Managed,
            installed_at: Utc::now(),
            updated_at: None,
            updated_to_version: None,
        }
    }
}

/// Per-project metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Package version currently installed
    pub installed_version: String,
    /// When the package was first installed
    pub installed_at: DateTime<Utc>,
    /// Last time an update was checked for
    #[serde(default)]
    pub last_update_check: Option<DateTime<Utc>>,
    /// Last time an update was applied
    #[serde(default)]
    pub last_update_applied: Option<DateTime<Utc>>,
    /// Tracked files by relative path
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

impl Metadata {
    /// Create an empty document for a new install
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            installed_version: version.into(),
            installed_at: Utc::now(),
            last_update_check: None,
            last_update_applied: None,
            files: BTreeMap::new(),
        }
    }

    /// Look up the record for a relative path
    ///
    /// Any spelling of the path finds the same record. Unsafe paths have none.
    pub fn record(&self, path: &str) -> Option<&FileRecord> {
        let key = utils::normalize_key(path).ok()?;
        self.files.get(&key)
    }

    /// Insert or refresh the record for `path`
    ///
    /// New paths get a fresh record; existing ones keep `installedAt` and get
    /// `updatedAt`/`updatedToVersion` set.
    ///
    /// # Errors
    ///
    /// [`DriftguardError::UnsafePath`] if `path` is empty or escapes the root.
    pub fn upsert(&mut self, path: &str, hash: ContentHash, version: &str) -> Result<&FileRecord> {
        let key = utils::normalize_key(path)?;
        let record = self
            .files
            .entry(key)
            .and_modify(|record| {
                record.hash = hash.clone();
                record.source = FileSource::Managed;
                record.updated_at = Some(Utc::now());
                record.updated_to_version = Some(version.to_string());
            })
            .or_insert_with(|| FileRecord::new(hash));
        Ok(record)
    }

    /// Drop the record for `path`, whatever its spelling
    pub fn remove(&mut self, path: &str) -> Result<Option<FileRecord>> {
        let key = utils::normalize_key(path)?;
        Ok(self.files.remove(&key))
    }
}

/// How transaction content should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Text; must be valid UTF-8
    #[default]
    Utf8,
    /// Opaque bytes
    Binary,
}

/// One file write inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOperation {
    /// Target path; relative paths are resolved against the transaction root
    pub path: PathBuf,
    /// Full new content; empty is allowed
    pub content: Vec<u8>,
    /// Content encoding
    pub encoding: Encoding,
}

impl TransactionOperation {
    /// Text operation
    pub fn text(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into().into_bytes(),
            encoding: Encoding::Utf8,
        }
    }

    /// Binary operation
    pub fn binary(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            encoding: Encoding::Binary,
        }
    }
}

/// Options for a single atomic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flush file data before the replace and the directory after it
    pub sync: bool,
    /// Unix permissions applied to the new file
    pub mode: Option<u32>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { sync: true, mode: None }
    }
}

/// Options for a read-transform-write update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Treat a missing file as empty instead of failing
    pub create_if_missing: bool,
    /// Options for the final write
    pub write: WriteOptions,
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionResult {
    /// Targets that did not exist before
    pub created: Vec<PathBuf>,
    /// Targets that were overwritten
    pub replaced: Vec<PathBuf>,
    /// Total bytes written
    pub bytes_written: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl TransactionResult {
    /// Number of files written
    pub fn files_written(&self) -> usize {
        self.created.len() + self.replaced.len()
    }
}

/// Manifest stored in every backup directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    /// Directory name of the backup
    pub timestamp: String,
    /// Why the backup was taken
    pub reason: String,
    /// Installed version at backup time
    pub version: String,
    /// Number of files copied
    pub file_count: usize,
    /// Relative paths copied into the backup
    pub files: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A backup found on disk
#[derive(Debug, Clone)]
pub struct BackupInfo {
    /// Backup directory
    pub path: PathBuf,
    /// Its manifest
    pub manifest: BackupManifest,
}

/// Result of creating a backup
///
/// A backup with per-file failures is still a valid backup of the files that
/// were copied; call [`BackupOutcome::ensure_complete`] to treat it as an error.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// Backup directory
    pub path: PathBuf,
    /// Manifest that was written
    pub manifest: BackupManifest,
    /// Files that could not be copied
    pub failures: Vec<FileFailure>,
}

impl BackupOutcome {
    /// Whether every tracked file made it into the backup
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert an incomplete backup into [`DriftguardError::BackupIncomplete`]
    pub fn ensure_complete(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(DriftguardError::BackupIncomplete {
                backup_path: self.path,
                failures: self.failures,
            })
        }
    }
}

/// Result of restoring a backup
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// Backup that was restored
    pub backup_path: PathBuf,
    /// Files restored
    pub restored: usize,
    /// Files listed in the manifest
    pub total: usize,
    /// Version recorded in the manifest
    pub version: String,
    /// Whether the metadata document was restored
    pub metadata_restored: bool,
    /// Files that failed to restore
    pub failures: Vec<FileFailure>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl RestoreResult {
    /// Whether every listed file was restored
    pub fn is_complete(&self) -> bool {
        self.restored == self.total
    }

    /// Convert a partial restore into [`DriftguardError::RestorePartial`]
    pub fn ensure_complete(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(DriftguardError::RestorePartial {
                restored: self.restored,
                total: self.total,
                failures: self.failures,
            })
        }
    }
}

/// Engine configuration
///
/// Every component receives this at construction; nothing is global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Project root all tracked paths are relative to
    pub root: PathBuf,
    /// Directory under the root holding metadata and backups
    pub tool_dir: String,
    /// Metadata file name inside `tool_dir`
    pub metadata_file: String,
    /// Backups directory name inside `tool_dir`
    pub backups_dir: String,
    /// Manifest file name inside each backup
    pub manifest_file: String,
    /// Glob patterns for user content that is never overwritten or backed up
    pub user_content_patterns: Vec<String>,
    /// Glob patterns for content the engine may manage (empty means everything else)
    pub core_content_patterns: Vec<String>,
    /// Flush writes to disk before replacing
    pub sync_writes: bool,
}

impl EngineConfig {
    /// Default configuration for `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tool_dir: ".driftguard".to_string(),
            metadata_file: "update-metadata.json".to_string(),
            backups_dir: "backups".to_string(),
            manifest_file: "manifest.json".to_string(),
            user_content_patterns: Vec::new(),
            core_content_patterns: Vec::new(),
            sync_writes: true,
        }
    }

    /// `<root>/<tool_dir>`
    pub fn tool_path(&self) -> PathBuf {
        self.root.join(&self.tool_dir)
    }

    /// `<root>/<tool_dir>/<metadata_file>`
    pub fn metadata_path(&self) -> PathBuf {
        self.tool_path().join(&self.metadata_file)
    }

    /// `<root>/<tool_dir>/<backups_dir>`
    pub fn backups_path(&self) -> PathBuf {
        self.tool_path().join(&self.backups_dir)
    }

    /// Whether `path` (relative to the root) is inside the tool directory
    pub fn is_tool_path(&self, path: &Path) -> bool {
        path.components().next().map(|c| c.as_os_str() == self.tool_dir.as_str()).unwrap_or(false)
    }

    /// Write options derived from this configuration
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions { sync: self.sync_writes, mode: None }
    }
}

/// Hook for observing or vetoing file writes
///
/// Returning an error from a hook fails that step exactly as an I/O error
/// would, including cleanup and rollback. Rollback writes do not run
/// `before_stage`/`before_commit`; they only run `before_rollback`.
pub trait WriteHook: Send + Sync {
    /// Called before content is written to a temporary sibling of `target`
    fn before_stage(&self, _target: &Path) -> Result<()> {
        Ok(())
    }

    /// Called before the staged file replaces `target`
    fn before_commit(&self, _target: &Path) -> Result<()> {
        Ok(())
    }

    /// Called before a failed transaction puts `target` back
    fn before_rollback(&self, _target: &Path) -> Result<()> {
        Ok(())
    }
}
