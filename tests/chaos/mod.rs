//! Chaos testing for Driftguard
//!
//! Injects failures at every step of a write through [`WriteHook`]s and damages
//! on-disk state, then checks that targets end up either fully old or fully new
//! and that every failure is reported with the paths it affects.

use ::driftguard::*;
use tempfile::TempDir;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::warn;

/// Fails the commit of the file whose name ends with `target`
pub struct FailCommitOf(pub &'static str);

impl WriteHook for FailCommitOf {
    fn before_commit(&self, target: &Path) -> Result<()> {
        if target.ends_with(self.0) {
            return Err(DriftguardError::internal("injected commit failure"));
        }
        Ok(())
    }
}

/// Fails the n-th commit it sees
pub struct FailNthCommit {
    n: usize,
    seen: AtomicUsize,
}

impl FailNthCommit {
    pub fn new(n: usize) -> Self {
        Self { n, seen: AtomicUsize::new(0) }
    }
}

impl WriteHook for FailNthCommit {
    fn before_commit(&self, target: &Path) -> Result<()> {
        if self.seen.fetch_add(1, Ordering::SeqCst) == self.n {
            warn!("Injecting failure for {:?}", target);
            return Err(DriftguardError::internal("injected commit failure"));
        }
        Ok(())
    }
}

/// Fails the commit of `fail_commit`, then refuses to roll back `block_rollback`
pub struct BrokenRollback {
    fail_commit: &'static str,
    block_rollback: &'static str,
}

impl WriteHook for BrokenRollback {
    fn before_commit(&self, target: &Path) -> Result<()> {
        if target.ends_with(self.fail_commit) {
            return Err(DriftguardError::internal("injected commit failure"));
        }
        Ok(())
    }

    fn before_rollback(&self, target: &Path) -> Result<()> {
        if target.ends_with(self.block_rollback) {
            return Err(DriftguardError::internal("injected rollback failure"));
        }
        Ok(())
    }
}

fn temp_files_in(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| utils::is_temp_file_name(&p.file_name().unwrap().to_string_lossy()))
        .collect()
}

#[test]
fn test_third_commit_failure_restores_everything() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("p1"), "A").unwrap();
    fs::write(root.join("p2"), "B").unwrap();

    let manager = TransactionManager::new(root)
        .with_writer(AtomicWriter::new().with_hook(Arc::new(FailCommitOf("p3"))));
    let err = manager
        .apply_batch(&[
            TransactionOperation::text("p1", "A'"),
            TransactionOperation::text("p2", "B'"),
            TransactionOperation::text("p3", "C'"),
        ])
        .unwrap_err();

    match &err {
        DriftguardError::TransactionAborted { failed_path, rolled_back, cleanup_failures, .. } => {
            assert!(failed_path.ends_with("p3"));
            assert_eq!(*rolled_back, 2);
            assert!(cleanup_failures.is_empty());
        }
        other => panic!("expected clean abort, got {other:?}"),
    }
    assert!(!err.leaves_unknown_state());
    assert_eq!(fs::read_to_string(root.join("p1")).unwrap(), "A");
    assert_eq!(fs::read_to_string(root.join("p2")).unwrap(), "B");
    assert!(!root.join("p3").exists());
    assert!(temp_files_in(root).is_empty());
}

#[test]
fn test_rollback_failure_names_affected_paths() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("p1"), "A").unwrap();
    fs::write(root.join("p2"), "B").unwrap();

    let hook = BrokenRollback {
        fail_commit: "p3",
        block_rollback: "p1",
    };
    let manager = TransactionManager::new(root)
        .with_writer(AtomicWriter::new().with_hook(Arc::new(hook)));
    let err = manager
        .apply_batch(&[
            TransactionOperation::text("p1", "A'"),
            TransactionOperation::text("p2", "B'"),
            TransactionOperation::text("p3", "C'"),
        ])
        .unwrap_err();

    assert!(err.leaves_unknown_state());
    let affected = err.affected_paths();
    assert_eq!(affected.len(), 1);
    assert!(affected[0].ends_with("p1"));
    assert!(err.user_message().contains("manual inspection"));

    // p2 was rolled back; p1 kept the new content
    assert_eq!(fs::read_to_string(root.join("p2")).unwrap(), "B");
    assert_eq!(fs::read_to_string(root.join("p1")).unwrap(), "A'");
    assert!(!root.join("p3").exists());
    assert!(temp_files_in(root).is_empty());
}

#[test]
fn test_random_commit_failures_are_all_or_nothing() {
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..20 {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let count = rng.random_range(2..12);

        let mut operations = Vec::new();
        let mut before = Vec::new();
        for i in 0..count {
            let name = format!("f{}.txt", i);
            let existing = rng.random_bool(0.5);
            if existing {
                fs::write(root.join(&name), format!("old {}", i)).unwrap();
            }
            before.push((name.clone(), existing));
            operations.push(TransactionOperation::text(name, format!("new {} round {}", i, round)));
        }

        let fail_at = rng.random_range(0..count);
        let manager = TransactionManager::new(root)
            .with_writer(AtomicWriter::new().with_hook(Arc::new(FailNthCommit::new(fail_at))));
        assert!(manager.apply_batch(&operations).is_err());

        for (i, (name, existed)) in before.iter().enumerate() {
            let path = root.join(name);
            if *existed {
                assert_eq!(fs::read_to_string(&path).unwrap(), format!("old {}", i));
            } else {
                assert!(!path.exists(), "round {}: {} should not exist", round, name);
            }
        }
        assert!(temp_files_in(root).is_empty());
    }
}

#[test]
fn test_missing_parent_aborts_before_any_commit() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.md"), "old").unwrap();

    let err = TransactionManager::new(root)
        .apply_batch(&[
            TransactionOperation::text("a.md", "new"),
            TransactionOperation::text("no/such/dir/b.md", "b"),
        ])
        .unwrap_err();

    assert!(matches!(
        err.root_cause(),
        DriftguardError::MissingParentDirectory { .. }
    ));
    assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "old");
    assert!(temp_files_in(root).is_empty());
}

#[test]
fn test_failed_single_write_keeps_old_content() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("config.json");
    fs::write(&target, "{\"old\":true}").unwrap();

    let writer = AtomicWriter::new().with_hook(Arc::new(FailCommitOf("config.json")));
    assert!(writer.write(&target, b"{\"new\":true}", &WriteOptions::default()).is_err());

    assert_eq!(fs::read_to_string(&target).unwrap(), "{\"old\":true}");
    assert!(temp_files_in(temp_dir.path()).is_empty());
}

#[test]
fn test_target_replaced_by_directory_fails_cleanly() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(root.join("a.md"), "old a").unwrap();
    fs::create_dir(root.join("b.md")).unwrap();
    fs::write(root.join("b.md/inner"), "x").unwrap();

    let err = TransactionManager::new(root)
        .apply_batch(&[
            TransactionOperation::text("a.md", "new a"),
            TransactionOperation::text("b.md", "new b"),
        ])
        .unwrap_err();

    // A directory cannot be snapshotted as file content
    assert!(matches!(err, DriftguardError::TransactionAborted { .. }));
    assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "old a");
    assert!(root.join("b.md/inner").exists());
}

#[test]
fn test_corrupt_metadata_is_not_treated_as_fresh() {
    let temp_dir = TempDir::new().unwrap();
    let engine = EngineBuilder::new().build(temp_dir.path()).unwrap();
    engine
        .install(&MemorySource::new("1.0.0").with_file("a.md", "a"), false)
        .unwrap();
    fs::write(engine.config().metadata_path(), "{\"installedVersion\": 12").unwrap();

    assert!(matches!(
        engine.status(),
        Err(DriftguardError::CorruptMetadata { .. })
    ));
    assert!(matches!(
        engine.install(&MemorySource::new("1.0.0"), false),
        Err(DriftguardError::CorruptMetadata { .. })
    ));
    assert!(matches!(
        engine.detector().classify("a.md"),
        Err(DriftguardError::CorruptMetadata { .. })
    ));
}

#[test]
fn test_restore_from_backup_repairs_corrupt_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let engine = EngineBuilder::new().build(temp_dir.path()).unwrap();
    engine
        .install(&MemorySource::new("1.0.0").with_file("a.md", "a"), false)
        .unwrap();
    let backup = engine.backups().create_full_backup("manual").unwrap();
    fs::write(engine.config().metadata_path(), "garbage").unwrap();

    engine.backups().restore_from_backup(&backup.path).unwrap();
    assert_eq!(engine.status().unwrap().installed_version, "1.0.0");
}

#[test]
fn test_damaged_backups_are_skipped_or_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = EngineBuilder::new().build(temp_dir.path()).unwrap();
    engine
        .install(&MemorySource::new("1.0.0").with_file("a.md", "a"), false)
        .unwrap();
    let good = engine.backups().create_full_backup("good").unwrap();
    let bad = engine.backups().create_full_backup("bad").unwrap();
    fs::write(bad.path.join("manifest.json"), "not json").unwrap();

    let listed = engine.backups().list_backups().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, good.path);

    assert!(matches!(
        engine.backups().restore_from_backup(&bad.path),
        Err(DriftguardError::InvalidBackup { .. })
    ));
}

#[test]
fn test_failed_update_hook_leaves_metadata_and_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    EngineBuilder::new()
        .build(root)
        .unwrap()
        .install(
            &MemorySource::new("1.0.0").with_file("a.md", "a1").with_file("b.md", "b1"),
            false,
        )
        .unwrap();

    let engine = EngineBuilder::new()
        .hook(Arc::new(FailCommitOf("b.md")))
        .build(root)
        .unwrap();
    let before = engine.store().load_required().unwrap();
    let v2 = MemorySource::new("2.0.0").with_file("a.md", "a2").with_file("b.md", "b2");

    assert!(engine.apply_update(&v2, &ApplyOptions { backup: false, ..Default::default() }).is_err());
    assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "a1");
    assert_eq!(fs::read_to_string(root.join("b.md")).unwrap(), "b1");
    assert_eq!(engine.store().load_required().unwrap(), before);
    assert!(engine.status().unwrap().is_clean());
}
