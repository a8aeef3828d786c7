//! Error types for the Driftguard library
//!
//! This module defines all error types that can occur during Driftguard operations.
//! Each failure kind is its own variant so callers can branch on the kind without
//! string-matching messages. Secondary failures (rollback, temp-file cleanup,
//! per-file copies) are carried as structured values attached to the primary error.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Type alias for Results in the Driftguard library
pub type Result<T> = std::result::Result<T, DriftguardError>;

/// Boxed error returned by caller-supplied update functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for all Driftguard operations
#[derive(Debug, Error)]
pub enum DriftguardError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Content read for a text update was not valid UTF-8
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The target's parent directory does not exist
    #[error("Parent directory does not exist for {path:?}")]
    MissingParentDirectory {
        /// Target path that was being written
        path: PathBuf,
    },

    /// Permission denied at any stage of a write
    #[error("Insufficient permissions for {path:?}")]
    InsufficientPermissions {
        /// Target path of the operation
        path: PathBuf,
    },

    /// Both the rename and the remove-then-rename fallback failed
    #[error("Failed to replace {path:?}: rename failed ({rename_error}), fallback failed ({fallback_error})")]
    ReplaceFailed {
        /// Target path that could not be replaced
        path: PathBuf,
        /// Error from the direct rename
        rename_error: std::io::Error,
        /// Error from the remove-then-rename fallback
        fallback_error: std::io::Error,
    },

    /// File to update does not exist and creation was not requested
    #[error("File not found: {path:?}")]
    FileNotFound {
        /// Path that was expected to exist
        path: PathBuf,
    },

    /// The caller's transform function returned an error
    #[error("Update function failed for {path:?}: {source}")]
    UpdateFunctionFailed {
        /// Path being updated
        path: PathBuf,
        /// Error returned by the transform
        source: BoxError,
    },

    /// The caller's transform function returned no content
    #[error("Update function returned no content for {path:?}")]
    InvalidUpdateResult {
        /// Path being updated
        path: PathBuf,
    },

    /// Transaction input was malformed; nothing was touched
    #[error("Transaction validation failed: {}", .issues.join("; "))]
    ValidationFailed {
        /// Every problem found in the batch
        issues: Vec<String>,
    },

    /// A batch failed and every touched target was restored
    #[error("Transaction aborted at {failed_path:?} during {phase}: {source}; rollback succeeded ({rolled_back} restored)")]
    TransactionAborted {
        /// Target whose step failed
        failed_path: PathBuf,
        /// Phase in which the failure happened
        phase: TransactionPhase,
        /// The triggering failure
        source: Box<DriftguardError>,
        /// Number of committed targets that were rolled back
        rolled_back: usize,
        /// Temporary files that could not be removed
        cleanup_failures: Vec<CleanupFailure>,
    },

    /// A batch failed and some targets could not be restored
    #[error(
        "Transaction aborted at {failed_path:?} during {phase}: {source}; rollback failed for {} path(s): {}",
        .rollback_errors.len(),
        RollbackFailure::list(.rollback_errors)
    )]
    TransactionAbortedWithRollbackErrors {
        /// Target whose step failed
        failed_path: PathBuf,
        /// Phase in which the failure happened
        phase: TransactionPhase,
        /// The triggering failure
        source: Box<DriftguardError>,
        /// Per-path rollback failures; these paths are in an unknown state
        rollback_errors: Vec<RollbackFailure>,
        /// Temporary files that could not be removed
        cleanup_failures: Vec<CleanupFailure>,
    },

    /// Metadata file exists but cannot be parsed
    #[error("Corrupt metadata at {path:?}: {source}")]
    CorruptMetadata {
        /// Metadata file path
        path: PathBuf,
        /// Parse error
        source: serde_json::Error,
    },

    /// Some files could not be copied into a backup
    #[error("Backup at {backup_path:?} is incomplete: {} file(s) not copied", .failures.len())]
    BackupIncomplete {
        /// Backup directory that was still created
        backup_path: PathBuf,
        /// Files left out of the backup
        failures: Vec<FileFailure>,
    },

    /// Restore finished with fewer files restored than listed
    #[error("Restore partial: {restored} of {total} files restored")]
    RestorePartial {
        /// Files restored
        restored: usize,
        /// Files listed in the manifest
        total: usize,
        /// Files that failed to restore
        failures: Vec<FileFailure>,
    },

    /// Backup directory has no readable manifest
    #[error("Invalid backup at {path:?}: {reason}")]
    InvalidBackup {
        /// Backup directory
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Metadata has never been written for this root
    #[error("Not initialized at path: {0:?}")]
    NotInitialized(PathBuf),

    /// Metadata already exists, so a first install is refused
    #[error("Already installed at path: {0:?}")]
    AlreadyInstalled(PathBuf),

    /// Relative path that is empty, absolute, or escapes the root
    #[error("Unsafe path: {0:?}")]
    UnsafePath(PathBuf),

    /// Content pattern parsing error
    #[error("Invalid content pattern: {0}")]
    InvalidPattern(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Phase of a batch write in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Reading current contents of every target
    Snapshot,
    /// Writing new contents to temporary siblings
    Stage,
    /// Replacing targets with staged files
    Commit,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionPhase::Snapshot => write!(f, "snapshot"),
            TransactionPhase::Stage => write!(f, "stage"),
            TransactionPhase::Commit => write!(f, "commit"),
        }
    }
}

/// A target that could not be restored during rollback
#[derive(Debug)]
pub struct RollbackFailure {
    /// Target path, now in an unknown state
    pub path: PathBuf,
    /// Error encountered while restoring it
    pub error: DriftguardError,
}

impl RollbackFailure {
    fn list(failures: &[RollbackFailure]) -> String {
        failures
            .iter()
            .map(|f| format!("{:?} ({})", f.path, f.error))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A temporary file that could not be removed
#[derive(Debug)]
pub struct CleanupFailure {
    /// Temporary file path
    pub path: PathBuf,
    /// Removal error
    pub error: std::io::Error,
}

/// A per-file failure during backup or restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    /// Path relative to the project root
    pub path: String,
    /// Error message
    pub error: String,
}

impl DriftguardError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        DriftguardError::Internal(msg.into())
    }

    /// Map an I/O error for `path`, folding permission errors into `InsufficientPermissions`
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            DriftguardError::InsufficientPermissions {
                path: path.to_path_buf(),
            }
        } else {
            DriftguardError::Io(err)
        }
    }

    /// Check if this is a permission failure
    pub fn is_permission_error(&self) -> bool {
        match self {
            DriftguardError::InsufficientPermissions { .. } => true,
            DriftguardError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Check if the project may be left in a state that needs manual inspection
    pub fn leaves_unknown_state(&self) -> bool {
        matches!(self, DriftguardError::TransactionAbortedWithRollbackErrors { .. })
    }

    /// Paths that may be inconsistent after this error
    pub fn affected_paths(&self) -> Vec<&Path> {
        match self {
            DriftguardError::TransactionAbortedWithRollbackErrors { rollback_errors, .. } => {
                rollback_errors.iter().map(|f| f.path.as_path()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// The triggering failure of a transaction error, or `self`
    pub fn root_cause(&self) -> &DriftguardError {
        match self {
            DriftguardError::TransactionAborted { source, .. }
            | DriftguardError::TransactionAbortedWithRollbackErrors { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            DriftguardError::TransactionAbortedWithRollbackErrors { rollback_errors, .. } => {
                let mut msg = format!(
                    "Update failed and could not be fully rolled back: {}\n\
                     The project needs manual inspection. These paths may be inconsistent:",
                    self.root_cause()
                );
                for failure in rollback_errors {
                    msg.push_str(&format!("\n  {} ({})", failure.path.display(), failure.error));
                }
                msg
            }
            DriftguardError::TransactionAborted { .. } => {
                format!(
                    "Update failed: {}. All files were restored to their previous contents.",
                    self.root_cause()
                )
            }
            DriftguardError::InsufficientPermissions { path } => {
                format!("Permission denied for {:?}. Check file permissions or run with appropriate privileges.", path)
            }
            DriftguardError::MissingParentDirectory { path } => {
                format!("Cannot write {:?}: its parent directory does not exist.", path)
            }
            DriftguardError::CorruptMetadata { path, .. } => {
                format!(
                    "Metadata at {:?} is corrupt. Restore it from a backup with 'driftguard restore'.",
                    path
                )
            }
            DriftguardError::NotInitialized(path) => {
                format!("Nothing installed at {:?}. Run 'driftguard install' first.", path)
            }
            _ => self.to_string(),
        }
    }
}
