//! Property-based testing for Driftguard
//!
//! Uses proptest to verify invariants across randomly generated contents,
//! file sets, and failure points.

use ::driftguard::*;
use tempfile::TempDir;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fails the n-th commit it sees
struct FailNthCommit {
    n: usize,
    seen: AtomicUsize,
}

impl WriteHook for FailNthCommit {
    fn before_commit(&self, _target: &Path) -> Result<()> {
        if self.seen.fetch_add(1, Ordering::SeqCst) == self.n {
            return Err(DriftguardError::internal("injected commit failure"));
        }
        Ok(())
    }
}

/// Generate file names that are valid on every platform
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(\\.(md|txt|json))?"
}

/// Generate arbitrary binary content (including empty)
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Generate a set of unique files with optional pre-existing content
fn file_set_strategy() -> impl Strategy<Value = BTreeMap<String, (Option<Vec<u8>>, Vec<u8>)>> {
    prop::collection::btree_map(
        name_strategy(),
        (prop::option::of(content_strategy()), content_strategy()),
        1..8,
    )
}

fn snapshot(root: &Path, names: impl Iterator<Item = String>) -> BTreeMap<String, Option<Vec<u8>>> {
    names.map(|name| (name.clone(), fs::read(root.join(&name)).ok())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_hash_format_and_determinism(content in content_strategy()) {
        let first = hash_bytes(&content);
        let second = hash_bytes(&content);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.algorithm(), "sha256");
        prop_assert_eq!(first.hex().len(), 64);
        prop_assert!(first.hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let parsed: ContentHash = first.as_str().parse().unwrap();
        prop_assert_eq!(parsed, first);
    }

    #[test]
    fn prop_hash_file_matches_hash_bytes(content in content_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f.bin");
        fs::write(&path, &content).unwrap();
        prop_assert_eq!(hash_file(&path).unwrap(), hash_bytes(&content));
    }

    #[test]
    fn prop_atomic_write_is_exact(old in prop::option::of(content_strategy()), new in content_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("target.bin");
        if let Some(old) = &old {
            fs::write(&path, old).unwrap();
        }

        AtomicWriter::new().write(&path, &new, &WriteOptions { sync: false, mode: None }).unwrap();

        prop_assert_eq!(fs::read(&path).unwrap(), new);
        let entries = fs::read_dir(temp_dir.path()).unwrap().count();
        prop_assert_eq!(entries, 1);
    }

    #[test]
    fn prop_transaction_is_all_or_nothing(
        files in file_set_strategy(),
        fail_at in prop::option::of(0usize..8),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for (name, (old, _)) in &files {
            if let Some(old) = old {
                fs::write(root.join(name), old).unwrap();
            }
        }
        let before = snapshot(root, files.keys().cloned());

        let operations: Vec<TransactionOperation> = files
            .iter()
            .map(|(name, (_, new))| TransactionOperation::binary(name.as_str(), new.clone()))
            .collect();

        let mut writer = AtomicWriter::new();
        if let Some(n) = fail_at {
            writer = writer.with_hook(Arc::new(FailNthCommit { n, seen: AtomicUsize::new(0) }));
        }
        let manager = TransactionManager::new(root)
            .with_writer(writer)
            .with_options(WriteOptions { sync: false, mode: None });
        let result = manager.apply_batch(&operations);

        let after = snapshot(root, files.keys().cloned());
        match result {
            Ok(outcome) => {
                prop_assert_eq!(outcome.files_written(), files.len());
                for (name, (_, new)) in &files {
                    prop_assert_eq!(after[name].as_ref(), Some(new));
                }
            }
            Err(e) => {
                prop_assert!(!e.leaves_unknown_state());
                prop_assert_eq!(after, before);
            }
        }

        let leftovers = fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| utils::is_temp_file_name(&e.file_name().to_string_lossy()))
            .count();
        prop_assert_eq!(leftovers, 0);
    }

    #[test]
    fn prop_drift_matches_content_equality(
        installed in content_strategy(),
        current in prop::option::of(content_strategy()),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let engine = EngineBuilder::new().sync_writes(false).build(temp_dir.path()).unwrap();
        engine
            .install(&MemorySource::new("1.0.0").with_file("f.md", installed.clone()), false)
            .unwrap();

        match &current {
            Some(content) => fs::write(temp_dir.path().join("f.md"), content).unwrap(),
            None => fs::remove_file(temp_dir.path().join("f.md")).unwrap(),
        }

        let status = engine.detector().classify("f.md").unwrap();
        let expected = match &current {
            None => "user_deleted",
            Some(content) if *content == installed => "unchanged",
            Some(_) => "modified",
        };
        prop_assert_eq!(status.label(), expected);
        prop_assert_eq!(status.is_safe_to_overwrite(), expected == "unchanged");
    }

    #[test]
    fn prop_metadata_survives_save_and_load(
        records in prop::collection::btree_map(name_strategy(), content_strategy(), 0..10),
        version in "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
    ) {
        let temp_dir = TempDir::new().unwrap();
        let config = Arc::new(EngineConfig::new(temp_dir.path()));
        let store = MetadataStore::new(config, AtomicWriter::new());

        let metadata = store
            .record_files(
                records.iter().map(|(name, content)| (name.clone(), hash_bytes(content))),
                &version,
            )
            .unwrap();

        let loaded = store.load_required().unwrap();
        prop_assert_eq!(&loaded, &metadata);
        prop_assert_eq!(loaded.files.len(), records.len());
        prop_assert_eq!(loaded.installed_version, version);
    }
}
