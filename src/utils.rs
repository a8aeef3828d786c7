//! Utility functions for Driftguard
//!
//! This module provides the path and file helpers shared by the writer,
//! the transaction manager, and the backup manager:
//!
//! - Temporary sibling naming for atomic replaces
//! - Absolute path resolution without touching the filesystem
//! - Validation of project-relative paths (no escaping the root)
//! - Conversion between filesystem paths and metadata keys
//! - Unix permission handling and directory syncing
//!
//! All functions are synchronous and hold no shared state.

use crate::error::{DriftguardError, Result};
use chrono::Utc;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;
use uuid::Uuid;

/// Marker placed between the target file name and the unique suffix of a temp file
pub const TEMP_MARKER: &str = ".tmp.";

/// Build a temporary path next to `target`
///
/// The name is `<file_name>.tmp.<millis>.<random>`. The temporary file must live
/// in the same directory as the target so the final rename stays on one filesystem.
///
/// # Example
///
/// ```rust,ignore
/// use crate::utils::temp_sibling_path;
/// use std::path::Path;
///
/// let temp = temp_sibling_path(Path::new("/project/config.json"));
/// assert_eq!(temp.parent(), Some(Path::new("/project")));
/// assert!(temp.to_string_lossy().contains("config.json.tmp."));
/// ```
pub fn temp_sibling_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}{}{}.{}",
        file_name,
        TEMP_MARKER,
        Utc::now().timestamp_millis(),
        &suffix[..12]
    );
    target.with_file_name(name)
}

/// Check whether a file name looks like one of our temporary files
pub fn is_temp_file_name(name: &str) -> bool {
    name.contains(TEMP_MARKER)
}

/// Resolve `path` to an absolute path without requiring it to exist
pub fn resolve_absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::path::absolute(path)?)
}

/// Validate a project-relative path
///
/// Rejects empty paths, absolute paths, and any path containing `..` or a
/// root/prefix component, so that joining it onto the project root can never
/// land outside of it.
pub fn check_relative(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(DriftguardError::UnsafePath(path.to_path_buf()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DriftguardError::UnsafePath(path.to_path_buf()));
            }
        }
    }
    Ok(())
}

/// Join a validated relative path onto `root`
pub fn join_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    check_relative(rel)?;
    Ok(root.join(rel))
}

/// Convert a relative path into a metadata key (`/` separated, no `./`)
pub fn to_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate a relative path and convert it into its metadata key
///
/// `./docs/a.md`, `docs//a.md` and `docs/a.md` all map to the same key. A
/// path with nothing left after normalization (`.`) is unsafe.
pub fn normalize_key(path: &str) -> Result<String> {
    let rel = Path::new(path);
    check_relative(rel)?;
    let key = to_key(rel);
    if key.is_empty() {
        return Err(DriftguardError::UnsafePath(rel.to_path_buf()));
    }
    Ok(key)
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first and falls back to canonicalizing both sides,
/// which handles `..` segments and symlinked roots.
///
/// # Errors
///
/// - [`DriftguardError::Internal`] if the path is not under the base path
/// - [`DriftguardError::Io`] if canonicalization fails (fallback case only)
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| DriftguardError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Set Unix permissions
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, permissions).map_err(|e| DriftguardError::from_io(e, path))?;
    Ok(())
}

/// Set permissions (Windows implementation)
///
/// Only the owner write bit is honoured, mapped onto the read-only attribute.
#[cfg(windows)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let is_readonly = (mode & 0o200) == 0;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(is_readonly);
    fs::set_permissions(path, perms).map_err(|e| DriftguardError::from_io(e, path))?;
    Ok(())
}

/// Flush a directory entry to disk after a rename
///
/// Best effort: a failure here does not undo the rename, so it is only traced.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) {
    match fs::File::open(dir).and_then(|f| f.sync_all()) {
        Ok(()) => trace!("Synced directory {:?}", dir),
        Err(e) => trace!("Could not sync directory {:?}: {}", dir, e),
    }
}

/// Directory syncing is not available on this platform
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) {}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
