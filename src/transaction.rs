//! All-or-nothing batch writes
//!
//! The transaction manager applies a batch of [`TransactionOperation`]s so that
//! either every target holds its new content or every target is back to its
//! previous state.
//!
//! ## Phases
//!
//! 0. **Validate** every operation before touching the filesystem
//! 1. **Snapshot** the current content (or absence) of every target
//! 2. **Stage** every new content into a temporary sibling
//! 3. **Commit** each staged file over its target
//!
//! A failure in phases 1 and 2 leaves every target untouched. A failure in
//! phase 3 triggers a rollback: each committed target is rewritten with its
//! snapshot, or removed if it did not exist. Every target gets a rollback
//! attempt; failures are collected and reported together with the original
//! error in [`DriftguardError::TransactionAbortedWithRollbackErrors`].
//!
//! The manager owns every temporary file it stages for the duration of one
//! call and removes all of them on every exit path.
//!
//! ```rust,no_run
//! use driftguard::transaction::TransactionManager;
//! use driftguard::types::TransactionOperation;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TransactionManager::new("./project");
//! manager.apply_batch(&[
//!     TransactionOperation::text("a.md", "A"),
//!     TransactionOperation::text("b.md", "B"),
//! ])?;
//! # Ok(())
//! # }
//! ```

use crate::atomic::{AtomicWriter, StagedFile};
use crate::error::{CleanupFailure, DriftguardError, Result, RollbackFailure, TransactionPhase};
use crate::types::{Encoding, TransactionOperation, TransactionResult, WriteOptions};
use crate::utils;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// Pre-transaction state of one target
#[derive(Debug, Clone, PartialEq, Eq)]
enum Snapshot {
    Existing(Vec<u8>),
    Absent,
}

/// Applies batches of file writes as single units
#[derive(Debug, Clone)]
pub struct TransactionManager {
    root: PathBuf,
    writer: AtomicWriter,
    options: WriteOptions,
}

impl TransactionManager {
    /// Create a manager resolving relative operation paths against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: AtomicWriter::new(),
            options: WriteOptions::default(),
        }
    }

    /// Use a specific writer (and its hooks)
    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Use specific write options for staged files and rollback writes
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Root that relative paths are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply every operation or none of them
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::ValidationFailed`] for malformed input; nothing was touched
    /// - [`DriftguardError::TransactionAborted`] when a step failed and every target
    ///   is back to its previous state
    /// - [`DriftguardError::TransactionAbortedWithRollbackErrors`] when some targets
    ///   could not be restored; those paths are listed and must be inspected
    #[instrument(skip(self, operations), fields(operations = operations.len()))]
    pub fn apply_batch(&self, operations: &[TransactionOperation]) -> Result<TransactionResult> {
        let start = Instant::now();
        let targets = self.validate(operations)?;

        // Phase 1
        let mut snapshots = Vec::with_capacity(targets.len());
        for target in &targets {
            match read_snapshot(target) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    return Err(DriftguardError::TransactionAborted {
                        failed_path: target.clone(),
                        phase: TransactionPhase::Snapshot,
                        source: Box::new(e),
                        rolled_back: 0,
                        cleanup_failures: Vec::new(),
                    });
                }
            }
        }
        debug!("Snapshotted {} targets", snapshots.len());

        // Phase 2
        let mut staged: Vec<StagedFile> = Vec::with_capacity(targets.len());
        for (op, target) in operations.iter().zip(&targets) {
            match self.writer.stage(target, &op.content, &self.options) {
                Ok(file) => staged.push(file),
                Err(e) => {
                    warn!("Staging {:?} failed: {}", target, e);
                    let cleanup_failures = discard_all(&staged);
                    return Err(DriftguardError::TransactionAborted {
                        failed_path: target.clone(),
                        phase: TransactionPhase::Stage,
                        source: Box::new(e),
                        rolled_back: 0,
                        cleanup_failures,
                    });
                }
            }
        }
        debug!("Staged {} files", staged.len());

        // Phase 3
        for (index, file) in staged.iter().enumerate() {
            if let Err(e) = self.writer.commit(file) {
                error!("Commit of {:?} failed: {}; rolling back", file.target, e);
                return Err(self.abort_commit(index, e, &staged, &snapshots));
            }
        }

        let mut result = TransactionResult::default();
        for (file, snapshot) in staged.iter().zip(&snapshots) {
            result.bytes_written += file.size;
            match snapshot {
                Snapshot::Existing(_) => result.replaced.push(file.target.clone()),
                Snapshot::Absent => result.created.push(file.target.clone()),
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Committed transaction in {}ms ({} created, {} replaced)",
            result.duration_ms,
            result.created.len(),
            result.replaced.len()
        );
        Ok(result)
    }

    /// Check every operation and resolve its target path
    fn validate(&self, operations: &[TransactionOperation]) -> Result<Vec<PathBuf>> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(operations.len());

        for (index, op) in operations.iter().enumerate() {
            if op.path.as_os_str().is_empty() {
                issues.push(format!("operation {}: path is empty", index));
                continue;
            }
            if op.path.is_relative() && op.path.components().any(|c| c == Component::ParentDir) {
                issues.push(format!("operation {}: path {:?} escapes the root", index, op.path));
                continue;
            }
            if op.encoding == Encoding::Utf8 && std::str::from_utf8(&op.content).is_err() {
                issues.push(format!("operation {}: content for {:?} is not valid UTF-8", index, op.path));
            }

            let target = match utils::resolve_absolute(&self.root.join(&op.path)) {
                Ok(target) => target,
                Err(e) => {
                    issues.push(format!("operation {}: cannot resolve {:?}: {}", index, op.path, e));
                    continue;
                }
            };
            let normalized = normalize(&target);
            if !seen.insert(normalized.clone()) {
                issues.push(format!("operation {}: duplicate path {:?}", index, op.path));
            }
            targets.push(normalized);
        }

        if issues.is_empty() {
            Ok(targets)
        } else {
            Err(DriftguardError::ValidationFailed { issues })
        }
    }

    /// Roll back committed targets after the commit at `failed_index` failed
    fn abort_commit(
        &self,
        failed_index: usize,
        cause: DriftguardError,
        staged: &[StagedFile],
        snapshots: &[Snapshot],
    ) -> DriftguardError {
        let failed_path = staged[failed_index].target.clone();
        let mut rollback_errors = Vec::new();
        let mut rolled_back = 0;

        // A failed fallback replace may already have removed the target
        let mut to_restore: Vec<usize> = (0..failed_index).collect();
        if matches!(snapshots[failed_index], Snapshot::Existing(_)) && !failed_path.exists() {
            to_restore.push(failed_index);
        }

        for index in to_restore.into_iter().rev() {
            let target = &staged[index].target;
            match self.restore(target, &snapshots[index]) {
                Ok(()) => {
                    rolled_back += 1;
                    trace!("Rolled back {:?}", target);
                }
                Err(e) => {
                    error!("Rollback of {:?} failed: {}", target, e);
                    rollback_errors.push(RollbackFailure {
                        path: target.clone(),
                        error: e,
                    });
                }
            }
        }

        let cleanup_failures = discard_all(&staged[failed_index..]);

        if rollback_errors.is_empty() {
            info!("Rolled back {} committed files", rolled_back);
            DriftguardError::TransactionAborted {
                failed_path,
                phase: TransactionPhase::Commit,
                source: Box::new(cause),
                rolled_back,
                cleanup_failures,
            }
        } else {
            DriftguardError::TransactionAbortedWithRollbackErrors {
                failed_path,
                phase: TransactionPhase::Commit,
                source: Box::new(cause),
                rollback_errors,
                cleanup_failures,
            }
        }
    }

    /// Put one target back to its snapshot
    ///
    /// Stage and commit hooks are not consulted; a hook that vetoes writes
    /// must not also veto undoing them.
    fn restore(&self, target: &Path, snapshot: &Snapshot) -> Result<()> {
        self.writer.before_rollback(target)?;
        match snapshot {
            Snapshot::Existing(content) => {
                self.writer.without_hooks().write(target, content, &self.options)
            }
            Snapshot::Absent => match fs::remove_file(target) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(DriftguardError::from_io(e, target)),
            },
        }
    }
}

/// Read a target's current content, treating "does not exist" as a snapshot
fn read_snapshot(target: &Path) -> Result<Snapshot> {
    match fs::read(target) {
        Ok(content) => Ok(Snapshot::Existing(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Snapshot::Absent),
        Err(e) => Err(DriftguardError::from_io(e, target)),
    }
}

/// Remove every staged temporary file, collecting failures
fn discard_all(staged: &[StagedFile]) -> Vec<CleanupFailure> {
    staged
        .iter()
        .filter_map(|file| file.discard().err())
        .inspect(|failure| warn!("Failed to remove temporary file {:?}: {}", failure.path, failure.error))
        .collect()
}

/// Lexically drop `.` segments so equivalent spellings compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components().filter(|c| *c != Component::CurDir).collect()
}
