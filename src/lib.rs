//! # Driftguard - Safe in-place upgrades of generated files
//!
//! A transactional filesystem update engine that installs a package of files
//! into a project, detects which of them the user has edited since, and
//! upgrades the rest without clobbering anything.
//!
//! ## Overview
//!
//! Driftguard is a narrow "copy on install, hash to detect drift, back up before
//! overwrite" mechanism:
//! - Write single files atomically: readers see the old or the new content, never a mix
//! - Apply batches of writes all-or-nothing, with rollback on failure
//! - Record the hash of every file the engine wrote, per project root
//! - Classify each tracked file as unchanged, modified, deleted, or unknown
//! - Snapshot tracked files into timestamped backups and restore them
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! - **Content Hasher** ([`hasher`]): `sha256:<hex>` digests of file content
//! - **Atomic Writer** ([`atomic`]): temp sibling, flush, rename over the target
//! - **Transaction Manager** ([`transaction`]): snapshot, stage, commit, roll back
//! - **Metadata Store** ([`metadata`]): the per-project JSON document of owned files
//! - **Drift Detector** ([`drift`]): six-way classification and the content policy
//! - **Backup Manager** ([`backup`]): manifested snapshots of tracked core files
//! - **Engine** ([`engine`]): install, plan, update, and status on top of all of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use driftguard::{ApplyOptions, EngineBuilder, MemorySource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .user_content_patterns(vec!["specs/**".to_string()])
//!     .build("./my_project")?;
//!
//! // First install records the hash of every file written
//! let v1 = MemorySource::new("1.0.0").with_file("agents/reviewer.md", "# Reviewer\n");
//! engine.install(&v1, false)?;
//!
//! // Later: only files nobody edited are overwritten
//! let v2 = MemorySource::new("1.1.0").with_file("agents/reviewer.md", "# Reviewer v2\n");
//! let report = engine.apply_update(&v2, &ApplyOptions::default())?;
//! for entry in report.plan.skips() {
//!     println!("kept {} ({:?})", entry.path, entry.action);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Using the Components Directly
//!
//! ```rust,no_run
//! use driftguard::{AtomicWriter, TransactionManager, TransactionOperation, WriteOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! AtomicWriter::new().write(Path::new("./config.json"), b"{}", &WriteOptions::default())?;
//!
//! TransactionManager::new("./project").apply_batch(&[
//!     TransactionOperation::text("a.md", "A"),
//!     TransactionOperation::binary("logo.bin", vec![0u8, 1, 2]),
//! ])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The engine assumes a single writer per project root. Metadata updates are
//! read-modify-write and there is no locking between processes; running two
//! updates against the same root at once can lose metadata records.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, DriftguardError>`. Transaction failures tell
//! you whether rollback succeeded; when it did not,
//! [`DriftguardError::affected_paths`] lists the files that need manual inspection.
//!
//! ## Module Organization
//!
//! - [`hasher`]: Content digests
//! - [`atomic`]: Single-file atomic writes and write hooks
//! - [`transaction`]: Multi-file transactions
//! - [`metadata`]: Metadata persistence
//! - [`drift`]: Drift classification and content policy
//! - [`backup`]: Backup creation, listing, restore, pruning
//! - [`engine`]: Install and update orchestration
//! - [`source`]: Content sources for installs and updates
//! - [`types`]: Common types and configuration
//! - [`error`]: Error types and handling

// Public API modules
pub mod atomic;
pub mod backup;
pub mod drift;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod metadata;
pub mod source;
pub mod transaction;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use atomic::{AtomicWriter, StagedFile};
pub use backup::BackupManager;
pub use drift::{ContentPolicy, DriftDetector, DriftStatus};
pub use engine::{
    ApplyOptions, ApplyReport, Engine, EngineBuilder, PlanEntry, SkipReason, StatusReport,
    UpdateAction, UpdatePlan,
};
pub use error::{DriftguardError, Result};
pub use hasher::{hash_bytes, hash_file, ContentHash};
pub use metadata::MetadataStore;
pub use source::{ContentSource, DirectorySource, MemorySource};
pub use transaction::TransactionManager;
pub use types::*;
