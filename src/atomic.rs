//! Atomic single-file writes
//!
//! Every write goes through a temporary sibling file and a rename, so after any
//! completion or interruption a reader sees either the old content or the new
//! content, never a partial file.
//!
//! ## Write Sequence
//!
//! 1. Resolve the target to an absolute path; its parent directory must exist
//! 2. Write the full content to `<name>.tmp.<millis>.<random>` in the same directory
//! 3. Optionally fsync the temporary file and apply permissions
//! 4. Rename the temporary file over the target
//! 5. Optionally fsync the parent directory
//!
//! The temporary file must stay in the target's directory: a rename is only
//! atomic within one filesystem.
//!
//! ## Replace Fallback
//!
//! Some platforms refuse to rename over an existing file. When the rename fails
//! with one of those refusal kinds, the writer removes the target and renames
//! again. There is a short window in which the target does not exist. If the
//! fallback fails too, [`DriftguardError::ReplaceFailed`] carries both errors.
//!
//! ## Staging
//!
//! [`AtomicWriter::stage`] and [`AtomicWriter::commit`] split a write into its
//! two halves so the transaction manager can stage a whole batch before
//! replacing any target.
//!
//! ```rust,no_run
//! use driftguard::atomic::AtomicWriter;
//! use driftguard::types::WriteOptions;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = AtomicWriter::new();
//! writer.write(Path::new("config.json"), b"{}", &WriteOptions::default())?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BoxError, CleanupFailure, DriftguardError, Result};
use crate::types::{UpdateOptions, WriteHook, WriteOptions};
use crate::utils;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// A temporary file holding new content for a target, not yet committed
#[derive(Debug)]
pub struct StagedFile {
    /// Temporary sibling path
    pub temp: PathBuf,
    /// Absolute target path
    pub target: PathBuf,
    /// Bytes written to the temporary file
    pub size: u64,
    sync: bool,
}

impl StagedFile {
    /// Remove the temporary file without touching the target
    ///
    /// A temporary file that is already gone counts as removed.
    pub fn discard(&self) -> std::result::Result<(), CleanupFailure> {
        remove_temp(&self.temp)
    }
}

/// Writes files atomically through same-directory temporary files
#[derive(Clone, Default)]
pub struct AtomicWriter {
    hooks: Vec<Arc<dyn WriteHook>>,
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl AtomicWriter {
    /// Create a writer with no hooks
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook called around staging and committing
    pub fn with_hook(mut self, hook: Arc<dyn WriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Run every hook's `before_rollback` for `target`
    pub fn before_rollback(&self, target: &Path) -> Result<()> {
        for hook in &self.hooks {
            hook.before_rollback(target)?;
        }
        Ok(())
    }

    /// Copy of this writer without hooks
    pub fn without_hooks(&self) -> Self {
        Self::new()
    }

    /// Write `content` to `path` atomically
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::MissingParentDirectory`] if the parent directory does not exist
    /// - [`DriftguardError::InsufficientPermissions`] on any permission failure
    /// - [`DriftguardError::ReplaceFailed`] if both the rename and its fallback fail
    ///
    /// On error the target is untouched and the temporary file has been removed
    /// (a failed removal is logged, never reported instead of the original error).
    #[instrument(skip(self, content, options), fields(bytes = content.len()))]
    pub fn write(&self, path: &Path, content: &[u8], options: &WriteOptions) -> Result<()> {
        let staged = self.stage(path, content, options)?;
        match self.commit(&staged) {
            Ok(()) => {
                debug!("Wrote {:?} ({} bytes)", staged.target, staged.size);
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = staged.discard() {
                    warn!("Failed to remove temporary file {:?}: {}", cleanup.path, cleanup.error);
                }
                Err(e)
            }
        }
    }

    /// Read, transform, and atomically rewrite a text file
    ///
    /// The transform receives the current content (empty when the file is missing
    /// and `create_if_missing` is set) and returns the new content. Returning
    /// `Ok(None)` is rejected with [`DriftguardError::InvalidUpdateResult`].
    ///
    /// The read and the final write are not atomic with respect to other writers.
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::FileNotFound`] if the file is missing and creation was not requested
    /// - [`DriftguardError::UpdateFunctionFailed`] if the transform fails
    /// - [`DriftguardError::InvalidUpdateResult`] if the transform returns no content
    /// - any error from [`AtomicWriter::write`]
    pub fn update<F, E>(&self, path: &Path, transform: F, options: &UpdateOptions) -> Result<String>
    where
        F: FnOnce(&str) -> std::result::Result<Option<String>, E>,
        E: Into<BoxError>,
    {
        let target = utils::resolve_absolute(path)?;
        let current = match fs::read(&target) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|e| e.utf8_error())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if options.create_if_missing {
                    trace!("{:?} missing, updating from empty content", target);
                    String::new()
                } else {
                    return Err(DriftguardError::FileNotFound { path: target });
                }
            }
            Err(e) => return Err(DriftguardError::from_io(e, &target)),
        };

        let updated = match transform(&current) {
            Ok(Some(content)) => content,
            Ok(None) => return Err(DriftguardError::InvalidUpdateResult { path: target }),
            Err(e) => {
                return Err(DriftguardError::UpdateFunctionFailed {
                    path: target,
                    source: e.into(),
                })
            }
        };

        self.write(&target, updated.as_bytes(), &options.write)?;
        Ok(updated)
    }

    /// Write `content` to a temporary sibling of `path` without touching `path`
    ///
    /// On failure the temporary file has already been removed.
    pub fn stage(&self, path: &Path, content: &[u8], options: &WriteOptions) -> Result<StagedFile> {
        let target = utils::resolve_absolute(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| DriftguardError::MissingParentDirectory { path: target.clone() })?;
        if !parent.is_dir() {
            return Err(DriftguardError::MissingParentDirectory { path: target });
        }

        for hook in &self.hooks {
            hook.before_stage(&target)?;
        }

        let temp = utils::temp_sibling_path(&target);
        trace!("Staging {:?} via {:?}", target, temp);

        if let Err(e) = write_temp(&temp, content, options) {
            if let Err(cleanup) = remove_temp(&temp) {
                warn!("Failed to remove temporary file {:?}: {}", cleanup.path, cleanup.error);
            }
            return Err(match e {
                DriftguardError::Io(io_err) => DriftguardError::from_io(io_err, &target),
                other => other,
            });
        }

        Ok(StagedFile {
            temp,
            target,
            size: content.len() as u64,
            sync: options.sync,
        })
    }

    /// Replace the staged file's target with its temporary file
    ///
    /// On failure the temporary file is left for the caller to discard.
    pub fn commit(&self, staged: &StagedFile) -> Result<()> {
        for hook in &self.hooks {
            hook.before_commit(&staged.target)?;
        }

        replace(&staged.temp, &staged.target)?;

        if staged.sync {
            if let Some(parent) = staged.target.parent() {
                utils::sync_dir(parent);
            }
        }
        trace!("Committed {:?}", staged.target);
        Ok(())
    }
}

fn write_temp(temp: &Path, content: &[u8], options: &WriteOptions) -> Result<()> {
    let mut file = File::options().write(true).create_new(true).open(temp)?;
    file.write_all(content)?;
    if options.sync {
        file.sync_all()?;
    }
    drop(file);

    if let Some(mode) = options.mode {
        utils::set_permissions(temp, mode)?;
    }
    Ok(())
}

fn remove_temp(temp: &Path) -> std::result::Result<(), CleanupFailure> {
    match fs::remove_file(temp) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CleanupFailure {
            path: temp.to_path_buf(),
            error: e,
        }),
    }
}

/// Whether a rename error means the platform refused to overwrite an existing file
fn is_replace_refusal(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::AlreadyExists => true,
        io::ErrorKind::PermissionDenied => cfg!(windows),
        _ => false,
    }
}

/// Rename `temp` over `target`, falling back to remove-then-rename on refusal
fn replace(temp: &Path, target: &Path) -> Result<()> {
    replace_with(temp, target, |from, to| fs::rename(from, to))
}

fn replace_with<F>(temp: &Path, target: &Path, rename: F) -> Result<()>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    let rename_error = match rename(temp, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !(is_replace_refusal(&rename_error) && target.exists()) {
        return Err(DriftguardError::from_io(rename_error, target));
    }

    warn!(
        "Rename over {:?} refused ({}), removing target and retrying",
        target, rename_error
    );
    fs::remove_file(target)
        .and_then(|_| rename(temp, target))
        .map_err(|fallback_error| DriftguardError::ReplaceFailed {
            path: target.to_path_buf(),
            rename_error,
            fallback_error,
        })
}
