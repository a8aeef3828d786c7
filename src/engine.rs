//! Install and update orchestration
//!
//! [`Engine`] ties the components together along the update data flow:
//!
//! 1. classify every path the [`ContentSource`] provides against the metadata
//! 2. decide per path whether it may be written ([`UpdatePlan`])
//! 3. back up the tracked core files
//! 4. write every planned file in one transaction
//! 5. record the new hashes and the installed version
//!
//! Only files the engine wrote and nobody touched since are overwritten
//! silently. Modified, deleted, untracked, or unreadable files are skipped
//! unless the caller forces the update; user content is never written.
//!
//! ```rust,no_run
//! use driftguard::{EngineBuilder, ApplyOptions, MemorySource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .user_content_patterns(vec!["specs/**".to_string()])
//!     .build("./project")?;
//!
//! let v1 = MemorySource::new("1.0.0").with_file("agents/reviewer.md", "v1");
//! engine.install(&v1, false)?;
//!
//! let v2 = MemorySource::new("1.1.0").with_file("agents/reviewer.md", "v2");
//! let report = engine.apply_update(&v2, &ApplyOptions::default())?;
//! println!("{} written, {} skipped", report.written(), report.skipped());
//! # Ok(())
//! # }
//! ```

use crate::atomic::AtomicWriter;
use crate::backup::BackupManager;
use crate::drift::{ContentPolicy, DriftDetector, DriftStatus};
use crate::error::{DriftguardError, Result};
use crate::hasher::{hash_bytes, hash_file, ContentHash};
use crate::metadata::MetadataStore;
use crate::source::ContentSource;
use crate::transaction::TransactionManager;
use crate::types::{BackupOutcome, EngineConfig, Metadata, TransactionOperation, TransactionResult, WriteHook};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Why a source path is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Matches a user content pattern
    UserContent,
    /// Not matched by any core content pattern
    NotCoreContent,
    /// Inside the engine's own tool directory
    Reserved,
    /// Edited since the engine last wrote it
    Modified,
    /// Deleted since the engine last wrote it
    UserDeleted,
    /// Exists with different content and has no record
    Untracked,
    /// Exists but could not be hashed
    HashError,
}

impl SkipReason {
    /// Human-readable explanation
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::UserContent => "user content",
            SkipReason::NotCoreContent => "not core content",
            SkipReason::Reserved => "reserved path",
            SkipReason::Modified => "modified locally",
            SkipReason::UserDeleted => "deleted locally",
            SkipReason::Untracked => "untracked file in the way",
            SkipReason::HashError => "unreadable",
        }
    }
}

/// What an update does with one source path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UpdateAction {
    /// Write a file that does not exist
    Create,
    /// Replace the current content
    Overwrite,
    /// The file already holds the new content; record it without writing
    Adopt,
    /// Recorded and current; nothing to do
    UpToDate,
    /// Leave the file alone
    Skip {
        /// Why
        reason: SkipReason,
    },
}

impl UpdateAction {
    /// Whether the file is written
    pub fn writes(&self) -> bool {
        matches!(self, UpdateAction::Create | UpdateAction::Overwrite)
    }

    /// Whether the file's hash is recorded afterwards
    pub fn records(&self) -> bool {
        matches!(self, UpdateAction::Create | UpdateAction::Overwrite | UpdateAction::Adopt)
    }

    /// Short label
    pub fn label(&self) -> &'static str {
        match self {
            UpdateAction::Create => "create",
            UpdateAction::Overwrite => "overwrite",
            UpdateAction::Adopt => "adopt",
            UpdateAction::UpToDate => "up_to_date",
            UpdateAction::Skip { .. } => "skip",
        }
    }
}

/// Decision for one source path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Path relative to the project root
    pub path: String,
    /// Drift classification at planning time
    pub status: DriftStatus,
    /// What the update will do
    pub action: UpdateAction,
    /// Hash of the source content
    pub hash: ContentHash,
}

/// Per-path decisions for moving a project to a source version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePlan {
    /// Version installed at planning time
    pub from_version: Option<String>,
    /// Version of the source
    pub to_version: String,
    /// Whether modified and unknown files were allowed to be overwritten
    pub force: bool,
    /// One entry per source path, sorted by path
    pub entries: Vec<PlanEntry>,
}

impl UpdatePlan {
    /// Entries that write a file
    pub fn writes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action.writes())
    }

    /// Entries that are skipped
    pub fn skips(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.action, UpdateAction::Skip { .. }))
    }

    /// Whether anything is written
    pub fn has_writes(&self) -> bool {
        self.writes().next().is_some()
    }

    /// Look up the entry for `path`
    pub fn entry(&self, path: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Options for [`Engine::apply_update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Overwrite modified, deleted, untracked, and unreadable files
    pub force: bool,
    /// Take a full backup before writing
    pub backup: bool,
    /// Plan only; touch nothing
    pub dry_run: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            force: false,
            backup: true,
            dry_run: false,
        }
    }
}

/// Outcome of an install or update
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// The plan that was carried out
    pub plan: UpdatePlan,
    /// Backup taken before writing
    pub backup: Option<BackupOutcome>,
    /// Transaction result when anything was written
    pub transaction: Option<TransactionResult>,
    /// Number of records written to metadata
    pub recorded: usize,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ApplyReport {
    /// Files written (or that would be written, for a dry run)
    pub fn written(&self) -> usize {
        self.plan.writes().count()
    }

    /// Files skipped
    pub fn skipped(&self) -> usize {
        self.plan.skips().count()
    }
}

/// Snapshot of the project's drift state
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Installed version
    pub installed_version: String,
    /// First install time
    pub installed_at: DateTime<Utc>,
    /// Last update check
    pub last_update_check: Option<DateTime<Utc>>,
    /// Last applied update
    pub last_update_applied: Option<DateTime<Utc>>,
    /// Classification of every tracked file
    pub files: BTreeMap<String, DriftStatus>,
    /// Files under the root with no record
    pub untracked: Vec<String>,
}

impl StatusReport {
    /// Number of tracked files with the given status label
    pub fn count(&self, label: &str) -> usize {
        self.files.values().filter(|s| s.label() == label).count()
    }

    /// Whether every tracked file is unchanged
    pub fn is_clean(&self) -> bool {
        self.files.values().all(DriftStatus::is_safe_to_overwrite)
    }
}

/// Builder for [`Engine`]
///
/// # Default Values
///
/// - `tool_dir`: `.driftguard`
/// - `metadata_file`: `update-metadata.json`
/// - `backups_dir`: `backups`
/// - `user_content_patterns`: empty
/// - `core_content_patterns`: empty (everything that is not user content)
/// - `sync_writes`: true
pub struct EngineBuilder {
    tool_dir: String,
    metadata_file: String,
    backups_dir: String,
    user_patterns: Vec<String>,
    core_patterns: Vec<String>,
    sync_writes: bool,
    hooks: Vec<Arc<dyn WriteHook>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("tool_dir", &self.tool_dir)
            .field("metadata_file", &self.metadata_file)
            .field("backups_dir", &self.backups_dir)
            .field("user_patterns", &self.user_patterns)
            .field("core_patterns", &self.core_patterns)
            .field("sync_writes", &self.sync_writes)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl EngineBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        let defaults = EngineConfig::new(PathBuf::new());
        Self {
            tool_dir: defaults.tool_dir,
            metadata_file: defaults.metadata_file,
            backups_dir: defaults.backups_dir,
            user_patterns: Vec::new(),
            core_patterns: Vec::new(),
            sync_writes: defaults.sync_writes,
            hooks: Vec::new(),
        }
    }

    /// Directory under the root holding metadata and backups
    pub fn tool_dir(mut self, name: impl Into<String>) -> Self {
        self.tool_dir = name.into();
        self
    }

    /// Metadata file name inside the tool directory
    pub fn metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_file = name.into();
        self
    }

    /// Backups directory name inside the tool directory
    pub fn backups_dir(mut self, name: impl Into<String>) -> Self {
        self.backups_dir = name.into();
        self
    }

    /// Glob patterns for user content
    pub fn user_content_patterns(mut self, patterns: Vec<String>) -> Self {
        self.user_patterns = patterns;
        self
    }

    /// Glob patterns for core content
    pub fn core_content_patterns(mut self, patterns: Vec<String>) -> Self {
        self.core_patterns = patterns;
        self
    }

    /// Flush writes to disk before replacing targets
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Add a write hook to every write the engine performs
    pub fn hook(mut self, hook: Arc<dyn WriteHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Build an engine for `root`
    ///
    /// # Errors
    ///
    /// [`DriftguardError::InvalidPattern`] if a content pattern does not parse.
    pub fn build(self, root: impl AsRef<Path>) -> Result<Engine> {
        let mut config = EngineConfig::new(utils::resolve_absolute(root.as_ref())?);
        config.tool_dir = self.tool_dir;
        config.metadata_file = self.metadata_file;
        config.backups_dir = self.backups_dir;
        config.user_content_patterns = self.user_patterns;
        config.core_content_patterns = self.core_patterns;
        config.sync_writes = self.sync_writes;

        let writer = self
            .hooks
            .into_iter()
            .fold(AtomicWriter::new(), |writer, hook| writer.with_hook(hook));
        Engine::with_writer(config, writer)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates installs, updates, backups, and status for one project root
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    policy: ContentPolicy,
    store: MetadataStore,
    detector: DriftDetector,
    backups: BackupManager,
    transactions: TransactionManager,
}

impl Engine {
    /// Engine with default settings for `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        EngineBuilder::new().build(root)
    }

    /// Engine from a full configuration
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        Self::with_writer(config, AtomicWriter::new())
    }

    fn with_writer(config: EngineConfig, writer: AtomicWriter) -> Result<Self> {
        let policy = ContentPolicy::new(&config.user_content_patterns, &config.core_content_patterns)?;
        let config = Arc::new(config);
        let store = MetadataStore::new(Arc::clone(&config), writer.clone());
        let transactions = TransactionManager::new(config.root.clone())
            .with_writer(writer.clone())
            .with_options(config.write_options());

        debug!("Opened engine at {:?}", config.root);
        Ok(Self {
            detector: DriftDetector::new(store.clone()),
            backups: BackupManager::new(store.clone(), policy.clone(), writer),
            store,
            transactions,
            policy,
            config,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Metadata store
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Drift detector
    pub fn detector(&self) -> &DriftDetector {
        &self.detector
    }

    /// Backup manager
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Content policy
    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }

    /// First install of `source`
    ///
    /// Every core path is written in one transaction and recorded. Existing
    /// files that already hold the source content are adopted; existing files
    /// with other content are skipped unless `force` is set.
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::AlreadyInstalled`] if metadata already exists
    /// - any transaction error; metadata is not written in that case
    #[instrument(skip(self, source), fields(version = source.version()))]
    pub fn install(&self, source: &dyn ContentSource, force: bool) -> Result<ApplyReport> {
        let start = Instant::now();
        if self.store.load()?.is_some() {
            return Err(DriftguardError::AlreadyInstalled(self.config.root.clone()));
        }

        let plan = self.build_plan(None, source, force)?;
        let (transaction, records) = self.write_plan(&plan, source)?;
        let recorded = records.len();
        self.store.record_files(records, source.version())?;

        let report = ApplyReport {
            plan,
            backup: None,
            transaction,
            recorded,
            dry_run: false,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Installed version {} in {}ms ({} written, {} skipped)",
            source.version(),
            report.duration_ms,
            report.written(),
            report.skipped()
        );
        Ok(report)
    }

    /// Decide what an update to `source` would do, and stamp `lastUpdateCheck`
    ///
    /// # Errors
    ///
    /// [`DriftguardError::NotInitialized`] if nothing is installed.
    pub fn plan_update(&self, source: &dyn ContentSource, force: bool) -> Result<UpdatePlan> {
        let metadata = self.store.load_required()?;
        let plan = self.build_plan(Some(&metadata), source, force)?;
        self.store.mark_update_check()?;
        Ok(plan)
    }

    /// Update the project to `source`
    ///
    /// Backs up tracked core files (unless disabled), writes every planned file
    /// in one transaction, records the new hashes, and sets the installed
    /// version. A failed transaction leaves metadata untouched and removes the
    /// directories it created for new files.
    ///
    /// # Errors
    ///
    /// - [`DriftguardError::NotInitialized`] if nothing is installed
    /// - backup errors other than per-file copy failures
    /// - any transaction error
    #[instrument(skip(self, source, options), fields(version = source.version()))]
    pub fn apply_update(&self, source: &dyn ContentSource, options: &ApplyOptions) -> Result<ApplyReport> {
        let start = Instant::now();
        let metadata = self.store.load_required()?;
        let plan = self.build_plan(Some(&metadata), source, options.force)?;

        if options.dry_run {
            debug!("Dry run; {} files would be written", plan.writes().count());
            return Ok(ApplyReport {
                plan,
                backup: None,
                transaction: None,
                recorded: 0,
                dry_run: true,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        let backup = if options.backup && plan.has_writes() {
            let reason = format!("pre-update {} -> {}", metadata.installed_version, source.version());
            let outcome = self.backups.create_full_backup(&reason)?;
            if !outcome.is_complete() {
                warn!(
                    "Backup {:?} is missing {} files",
                    outcome.path,
                    outcome.failures.len()
                );
            }
            Some(outcome)
        } else {
            None
        };

        let (transaction, records) = self.write_plan(&plan, source)?;
        let recorded = records.len();
        self.store.record_files(records, source.version())?;
        self.store.mark_update_applied(source.version())?;

        let report = ApplyReport {
            plan,
            backup,
            transaction,
            recorded,
            dry_run: false,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Updated {} -> {} in {}ms ({} written, {} skipped)",
            metadata.installed_version,
            source.version(),
            report.duration_ms,
            report.written(),
            report.skipped()
        );
        Ok(report)
    }

    /// Classify every tracked file and list untracked ones
    pub fn status(&self) -> Result<StatusReport> {
        let metadata = self.store.load_required()?;
        let files = self.detector.classify_all()?;
        let untracked = self.detector.find_untracked()?;
        Ok(StatusReport {
            installed_version: metadata.installed_version,
            installed_at: metadata.installed_at,
            last_update_check: metadata.last_update_check,
            last_update_applied: metadata.last_update_applied,
            files,
            untracked,
        })
    }

    fn build_plan(
        &self,
        metadata: Option<&Metadata>,
        source: &dyn ContentSource,
        force: bool,
    ) -> Result<UpdatePlan> {
        let mut entries: Vec<PlanEntry> = Vec::new();
        let mut seen = HashSet::new();
        for spelled in source.paths()? {
            let path = utils::normalize_key(&spelled)?;
            if !seen.insert(path.clone()) {
                return Err(DriftguardError::ValidationFailed {
                    issues: vec![format!("source lists {:?} more than once", path)],
                });
            }
            let hash = hash_bytes(&source.content(&spelled)?);
            let status = self.detector.classify_with(metadata, &path)?;
            let action = self.decide(metadata, &path, &status, &hash, force)?;
            entries.push(PlanEntry { path, status, action, hash });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(UpdatePlan {
            from_version: metadata.map(|m| m.installed_version.clone()),
            to_version: source.version().to_string(),
            force,
            entries,
        })
    }

    fn decide(
        &self,
        metadata: Option<&Metadata>,
        path: &str,
        status: &DriftStatus,
        new_hash: &ContentHash,
        force: bool,
    ) -> Result<UpdateAction> {
        let skip = |reason| UpdateAction::Skip { reason };

        if self.config.is_tool_path(Path::new(path)) {
            return Ok(skip(SkipReason::Reserved));
        }
        if self.policy.is_user_content(path) {
            return Ok(skip(SkipReason::UserContent));
        }
        if !self.policy.is_core_content(path) {
            return Ok(skip(SkipReason::NotCoreContent));
        }

        let action = match status {
            DriftStatus::Unchanged => {
                let recorded = metadata.and_then(|m| m.record(path)).map(|r| &r.hash);
                if recorded == Some(new_hash) {
                    UpdateAction::UpToDate
                } else {
                    UpdateAction::Overwrite
                }
            }
            DriftStatus::Modified { current, .. } if current == new_hash => UpdateAction::Adopt,
            DriftStatus::Modified { .. } if force => UpdateAction::Overwrite,
            DriftStatus::Modified { .. } => skip(SkipReason::Modified),
            DriftStatus::UserDeleted if force => UpdateAction::Create,
            DriftStatus::UserDeleted => skip(SkipReason::UserDeleted),
            DriftStatus::HashError { .. } if force => UpdateAction::Overwrite,
            DriftStatus::HashError { .. } => skip(SkipReason::HashError),
            DriftStatus::UserAdded | DriftStatus::NoMetadata => {
                self.decide_unrecorded(path, new_hash, force)?
            }
        };
        Ok(action)
    }

    /// Decide for a path with no record, based on what is on disk
    fn decide_unrecorded(&self, path: &str, new_hash: &ContentHash, force: bool) -> Result<UpdateAction> {
        let full_path = utils::join_relative(&self.config.root, path)?;
        if full_path.symlink_metadata().is_err() {
            return Ok(UpdateAction::Create);
        }
        let action = match hash_file(&full_path) {
            Ok(current) if &current == new_hash => UpdateAction::Adopt,
            _ if force => UpdateAction::Overwrite,
            Ok(_) => UpdateAction::Skip { reason: SkipReason::Untracked },
            Err(_) => UpdateAction::Skip { reason: SkipReason::HashError },
        };
        Ok(action)
    }

    /// Write every planned file in one transaction; return what to record
    ///
    /// Directories created for new files are removed again, when empty, if the
    /// transaction fails.
    fn write_plan(
        &self,
        plan: &UpdatePlan,
        source: &dyn ContentSource,
    ) -> Result<(Option<TransactionResult>, Vec<(String, ContentHash)>)> {
        let mut operations = Vec::new();
        let mut records = Vec::new();
        let mut created_dirs = Vec::new();

        for entry in &plan.entries {
            match entry.action {
                UpdateAction::Create | UpdateAction::Overwrite => {
                    let content = source.content(&entry.path)?;
                    records.push((entry.path.clone(), hash_bytes(&content)));
                    if let Err(e) = self.ensure_parent(&entry.path, &mut created_dirs) {
                        remove_empty_dirs(created_dirs);
                        return Err(e);
                    }
                    operations.push(TransactionOperation::binary(entry.path.clone(), content));
                }
                UpdateAction::Adopt => records.push((entry.path.clone(), entry.hash.clone())),
                UpdateAction::UpToDate | UpdateAction::Skip { .. } => {}
            }
        }

        if operations.is_empty() {
            return Ok((None, records));
        }
        match self.transactions.apply_batch(&operations) {
            Ok(result) => Ok((Some(result), records)),
            Err(e) => {
                remove_empty_dirs(created_dirs);
                Err(e)
            }
        }
    }

    /// Create the directories leading to a managed path
    ///
    /// Every directory this call creates is appended to `created`.
    fn ensure_parent(&self, path: &str, created: &mut Vec<PathBuf>) -> Result<()> {
        let full_path = utils::join_relative(&self.config.root, path)?;
        let Some(parent) = full_path.parent() else {
            return Ok(());
        };
        let missing: Vec<PathBuf> = parent
            .ancestors()
            .take_while(|dir| dir.symlink_metadata().is_err())
            .map(Path::to_path_buf)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(parent).map_err(|e| DriftguardError::from_io(e, parent))?;
        created.extend(missing);
        Ok(())
    }
}

/// Remove directories created for a failed write, deepest first
///
/// Directories that are no longer empty are left alone.
fn remove_empty_dirs(mut dirs: Vec<PathBuf>) {
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
        match fs::remove_dir(&dir) {
            Ok(()) => debug!("Removed directory {:?}", dir),
            Err(e) => debug!("Left directory {:?} in place: {}", dir, e),
        }
    }
}
