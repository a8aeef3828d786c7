//! Backups of tracked files
//!
//! Before an update overwrites anything, the backup manager copies every tracked
//! core file, plus the metadata document, into a new timestamped directory:
//!
//! ```text
//! <root>/<tool_dir>/backups/
//! └── 2026-10-19T12-30-45-123Z/
//!     ├── manifest.json          # BackupManifest
//!     ├── update-metadata.json   # copy of the metadata document
//!     └── docs/guide.md          # tracked files at their relative paths
//! ```
//!
//! A file that cannot be copied is logged and left out of the manifest; the
//! backup is still created. Restores copy files back first and the metadata
//! document last, so the metadata never claims a restore that did not happen.

use crate::atomic::AtomicWriter;
use crate::drift::ContentPolicy;
use crate::error::{DriftguardError, FileFailure, Result};
use crate::metadata::MetadataStore;
use crate::types::{BackupInfo, BackupManifest, BackupOutcome, EngineConfig, RestoreResult};
use crate::utils;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Creates, lists, restores, and prunes backups for one project root
#[derive(Debug, Clone)]
pub struct BackupManager {
    store: MetadataStore,
    policy: ContentPolicy,
    writer: AtomicWriter,
}

impl BackupManager {
    /// Create a manager for the store's root
    pub fn new(store: MetadataStore, policy: ContentPolicy, writer: AtomicWriter) -> Self {
        Self { store, policy, writer }
    }

    fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    /// Snapshot every tracked core file and the metadata document
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::NotInitialized`] if there is no metadata to back up
    /// - I/O errors creating the backup directory or writing the manifest
    ///
    /// Per-file copy failures are not errors; they are listed in
    /// [`BackupOutcome::failures`].
    #[instrument(skip(self))]
    pub fn create_full_backup(&self, reason: &str) -> Result<BackupOutcome> {
        let config = self.config();
        let metadata = self.store.load_required()?;
        let (timestamp, backup_path) = self.allocate_backup_dir()?;

        let mut copied = Vec::new();
        let mut failures = Vec::new();

        for path in metadata.files.keys() {
            if !self.policy.is_core_content(path) {
                trace!("Skipping user content {}", path);
                continue;
            }
            match copy_into(&config.root, &backup_path, path) {
                Ok(()) => copied.push(path.clone()),
                Err(e) => {
                    warn!("Could not back up {}: {}", path, e);
                    failures.push(FileFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let metadata_copy = backup_path.join(&config.metadata_file);
        fs::copy(config.metadata_path(), &metadata_copy)
            .map_err(|e| DriftguardError::from_io(e, &metadata_copy))?;

        let manifest = BackupManifest {
            timestamp,
            reason: reason.to_string(),
            version: metadata.installed_version.clone(),
            file_count: copied.len(),
            files: copied,
            created_at: Utc::now(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        self.writer.write(
            &backup_path.join(&config.manifest_file),
            &manifest_json,
            &config.write_options(),
        )?;

        info!(
            "Created backup {} ({} files, {} failed)",
            manifest.timestamp,
            manifest.file_count,
            failures.len()
        );
        Ok(BackupOutcome {
            path: backup_path,
            manifest,
            failures,
        })
    }

    /// List backups newest first
    ///
    /// Directories without a readable manifest are skipped.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let backups_path = self.config().backups_path();
        let entries = match fs::read_dir(&backups_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DriftguardError::from_io(e, &backups_path)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match self.read_manifest(&entry.path()) {
                Ok(manifest) => backups.push(BackupInfo {
                    path: entry.path(),
                    manifest,
                }),
                Err(e) => debug!("Skipping {:?}: {}", entry.path(), e),
            }
        }

        backups.sort_by(|a, b| {
            b.manifest
                .created_at
                .cmp(&a.manifest.created_at)
                .then_with(|| {
                    name_order(&b.manifest.timestamp).cmp(&name_order(&a.manifest.timestamp))
                })
        });
        Ok(backups)
    }

    /// Copy every file listed in a backup back into the project, then the metadata
    ///
    /// Per-file failures are collected and do not stop the restore; compare
    /// [`RestoreResult::restored`] against [`RestoreResult::total`], or call
    /// [`RestoreResult::ensure_complete`].
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::InvalidBackup`] if the backup has no readable manifest
    /// - any error writing the metadata document
    #[instrument(skip(self))]
    pub fn restore_from_backup(&self, backup_path: &Path) -> Result<RestoreResult> {
        let start = Instant::now();
        let config = self.config();
        let manifest = self.read_manifest(backup_path)?;
        let options = config.write_options();

        let mut restored = 0;
        let mut failures = Vec::new();

        for path in &manifest.files {
            match self.restore_file(backup_path, path) {
                Ok(()) => {
                    restored += 1;
                    trace!("Restored {}", path);
                }
                Err(e) => {
                    warn!("Could not restore {}: {}", path, e);
                    failures.push(FileFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Metadata last: it is the authoritative commit point of the restore
        let metadata_copy = backup_path.join(&config.metadata_file);
        let metadata_restored = match fs::read(&metadata_copy) {
            Ok(bytes) => {
                let tool_path = config.tool_path();
                fs::create_dir_all(&tool_path).map_err(|e| DriftguardError::from_io(e, &tool_path))?;
                self.writer.write(&config.metadata_path(), &bytes, &options)?;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Backup {:?} has no metadata copy", backup_path);
                false
            }
            Err(e) => return Err(DriftguardError::from_io(e, &metadata_copy)),
        };

        let result = RestoreResult {
            backup_path: backup_path.to_path_buf(),
            restored,
            total: manifest.files.len(),
            version: manifest.version,
            metadata_restored,
            failures,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Restored backup {} in {}ms ({} of {} files)",
            manifest.timestamp, result.duration_ms, result.restored, result.total
        );
        Ok(result)
    }

    /// Delete all but the newest `keep` backups, returning the removed paths
    pub fn prune_backups(&self, keep: usize) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for backup in self.list_backups()?.into_iter().skip(keep) {
            fs::remove_dir_all(&backup.path).map_err(|e| DriftguardError::from_io(e, &backup.path))?;
            debug!("Removed backup {:?}", backup.path);
            removed.push(backup.path);
        }
        if !removed.is_empty() {
            info!("Pruned {} backups, kept {}", removed.len(), keep);
        }
        Ok(removed)
    }

    /// Read and parse a backup's manifest
    pub fn read_manifest(&self, backup_path: &Path) -> Result<BackupManifest> {
        let manifest_path = backup_path.join(&self.config().manifest_file);
        let bytes = fs::read(&manifest_path).map_err(|e| DriftguardError::InvalidBackup {
            path: backup_path.to_path_buf(),
            reason: format!("cannot read manifest: {}", e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| DriftguardError::InvalidBackup {
            path: backup_path.to_path_buf(),
            reason: format!("malformed manifest: {}", e),
        })
    }

    /// Pick a fresh directory named after the current time
    fn allocate_backup_dir(&self) -> Result<(String, PathBuf)> {
        let backups_path = self.config().backups_path();
        fs::create_dir_all(&backups_path).map_err(|e| DriftguardError::from_io(e, &backups_path))?;

        let base = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string();
        let mut name = base.clone();
        let mut attempt = 0;
        loop {
            let path = backups_path.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((name, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    name = format!("{}-{}", base, attempt);
                }
                Err(e) => return Err(DriftguardError::from_io(e, &path)),
            }
        }
    }

    fn restore_file(&self, backup_path: &Path, path: &str) -> Result<()> {
        let source = utils::join_relative(backup_path, path)?;
        let target = utils::join_relative(&self.config().root, path)?;

        let content = fs::read(&source).map_err(|e| DriftguardError::from_io(e, &source))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| DriftguardError::from_io(e, parent))?;
        }
        self.writer.write(&target, &content, &self.config().write_options())
    }
}

/// Copy `root/relative` to `backup/relative`, creating directories as needed
fn copy_into(root: &Path, backup: &Path, relative: &str) -> Result<()> {
    let source = utils::join_relative(root, relative)?;
    let dest = utils::join_relative(backup, relative)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DriftguardError::from_io(e, parent))?;
    }
    fs::copy(&source, &dest).map_err(|e| DriftguardError::from_io(e, &source))?;
    Ok(())
}

/// Split a backup name into its timestamp and collision counter
///
/// `...Z-10` must sort after `...Z-9`, so the counter compares as a number.
fn name_order(name: &str) -> (&str, u32) {
    match name.split_once("Z-") {
        Some((base, counter)) => match counter.parse() {
            Ok(n) => (base, n),
            Err(_) => (name, 0),
        },
        None => (name.strip_suffix('Z').unwrap_or(name), 0),
    }
}
