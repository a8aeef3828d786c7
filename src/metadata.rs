//! Persistent per-project metadata
//!
//! The metadata document records which files the engine owns, the hash of the
//! content it last wrote to each, and the installed package version. It lives at
//! `<root>/<tool_dir>/<metadata_file>` and is always written in full through the
//! [`AtomicWriter`], so a partially written document is never observable.
//!
//! Read-modify-write operations (`record_file`, `record_files`, ...) are not
//! safe against concurrent callers on the same root.

use crate::atomic::AtomicWriter;
use crate::error::{DriftguardError, Result};
use crate::hasher::ContentHash;
use crate::types::{EngineConfig, FileRecord, Metadata};
use chrono::Utc;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Loads and saves the metadata document for one project root
#[derive(Debug, Clone)]
pub struct MetadataStore {
    config: Arc<EngineConfig>,
    writer: AtomicWriter,
}

impl MetadataStore {
    /// Create a store for the configured root
    pub fn new(config: Arc<EngineConfig>, writer: AtomicWriter) -> Self {
        Self { config, writer }
    }

    /// Configuration this store was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the metadata document
    ///
    /// Returns `Ok(None)` when no document exists yet.
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::CorruptMetadata`] if the document exists but cannot be parsed
    /// - [`DriftguardError::InsufficientPermissions`] / [`DriftguardError::Io`] on read failure
    pub fn load(&self) -> Result<Option<Metadata>> {
        let path = self.config.metadata_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No metadata at {:?}", path);
                return Ok(None);
            }
            Err(e) => return Err(DriftguardError::from_io(e, &path)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| DriftguardError::CorruptMetadata { path, source })
    }

    /// Load the metadata document, failing if it does not exist
    pub fn load_required(&self) -> Result<Metadata> {
        self.load()?
            .ok_or_else(|| DriftguardError::NotInitialized(self.config.root.clone()))
    }

    /// Save the full document atomically
    ///
    /// Creates the tool directory if needed; it belongs to the engine.
    #[instrument(skip(self, metadata), fields(files = metadata.files.len()))]
    pub fn save(&self, metadata: &Metadata) -> Result<()> {
        let tool_path = self.config.tool_path();
        fs::create_dir_all(&tool_path).map_err(|e| DriftguardError::from_io(e, &tool_path))?;

        let json = serde_json::to_vec_pretty(metadata)?;
        self.writer
            .write(&self.config.metadata_path(), &json, &self.config.write_options())?;
        debug!("Saved metadata ({} files)", metadata.files.len());
        Ok(())
    }

    /// Create and save a fresh document for `version`
    pub fn initialize(&self, version: &str) -> Result<Metadata> {
        let metadata = Metadata::new(version);
        self.save(&metadata)?;
        info!("Initialized metadata for version {}", version);
        Ok(metadata)
    }

    /// Record the hash of a file the engine just wrote
    ///
    /// Initializes a fresh document for `version` if none exists.
    pub fn record_file(&self, path: &str, hash: ContentHash, version: &str) -> Result<FileRecord> {
        let mut metadata = self.load()?.unwrap_or_else(|| Metadata::new(version));
        let record = metadata.upsert(path, hash, version)?.clone();
        self.save(&metadata)?;
        Ok(record)
    }

    /// Record several files in one read-modify-write
    pub fn record_files<I>(&self, files: I, version: &str) -> Result<Metadata>
    where
        I: IntoIterator<Item = (String, ContentHash)>,
    {
        let mut metadata = self.load()?.unwrap_or_else(|| Metadata::new(version));
        let mut count = 0;
        for (path, hash) in files {
            metadata.upsert(&path, hash, version)?;
            count += 1;
        }
        self.save(&metadata)?;
        debug!("Recorded {} files for version {}", count, version);
        Ok(metadata)
    }

    /// Drop the record for `path`, returning it if it existed
    pub fn forget_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let Some(mut metadata) = self.load()? else {
            return Ok(None);
        };
        let removed = metadata.remove(path)?;
        if removed.is_some() {
            self.save(&metadata)?;
        }
        Ok(removed)
    }

    /// Stamp `lastUpdateCheck` with the current time
    pub fn mark_update_check(&self) -> Result<Metadata> {
        let mut metadata = self.load_required()?;
        metadata.last_update_check = Some(Utc::now());
        self.save(&metadata)?;
        Ok(metadata)
    }

    /// Set `installedVersion` and stamp `lastUpdateApplied`
    pub fn mark_update_applied(&self, version: &str) -> Result<Metadata> {
        let mut metadata = self.load_required()?;
        metadata.installed_version = version.to_string();
        metadata.last_update_applied = Some(Utc::now());
        self.save(&metadata)?;
        Ok(metadata)
    }
}
