//! Main test module for Driftguard
//!
//! This module includes all test suites:
//! - Integration tests for full install/update/restore lifecycles
//! - Chaos tests for injected failures and damaged state
//! - Property-based tests for invariants
//! - Edge cases for unusual file names and contents

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::driftguard::*;
    use tempfile::TempDir;
    use std::fs;

    #[test]
    fn test_empty_content_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let manager = TransactionManager::new(temp_dir.path());

        manager
            .apply_batch(&[
                TransactionOperation::text("empty.md", ""),
                TransactionOperation::binary("empty.bin", Vec::new()),
            ])
            .unwrap();

        assert_eq!(fs::read(temp_dir.path().join("empty.md")).unwrap(), b"");
        assert_eq!(fs::read(temp_dir.path().join("empty.bin")).unwrap(), b"");
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let engine = EngineBuilder::new().sync_writes(false).build(temp_dir.path()).unwrap();

        let special_names = vec![
            "file with spaces.md",
            "file-with-dashes.md",
            "file.with.dots.md",
            "file@with#special$chars.md",
            "file(with)parens.md",
            "file[with]brackets.md",
            "файл.md",
            "文件.md",
        ];
        let mut source = MemorySource::new("1.0.0");
        for name in &special_names {
            source.insert(*name, format!("Content of {}", name));
        }

        engine.install(&source, false).unwrap();
        for name in &special_names {
            let content = fs::read_to_string(temp_dir.path().join(name)).unwrap();
            assert_eq!(content, format!("Content of {}", name));
            assert_eq!(engine.detector().classify(name).unwrap(), DriftStatus::Unchanged);
        }
    }

    #[test]
    fn test_binary_content_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

        AtomicWriter::new()
            .write(&temp_dir.path().join("blob.bin"), &content, &WriteOptions::default())
            .unwrap();

        assert_eq!(fs::read(temp_dir.path().join("blob.bin")).unwrap(), content);
        assert_eq!(hash_file(&temp_dir.path().join("blob.bin")).unwrap(), hash_bytes(&content));
    }

    #[test]
    fn test_invalid_utf8_text_rejected_before_io() {
        let temp_dir = TempDir::new().unwrap();
        let manager = TransactionManager::new(temp_dir.path());
        let op = TransactionOperation {
            path: "bad.md".into(),
            content: vec![0xff, 0xfe, 0x00],
            encoding: Encoding::Utf8,
        };

        let err = manager.apply_batch(&[op]).unwrap_err();
        assert!(matches!(err, DriftguardError::ValidationFailed { .. }));
        assert!(!temp_dir.path().join("bad.md").exists());
    }

    #[test]
    fn test_duplicate_spellings_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = TransactionManager::new(temp_dir.path());

        let err = manager
            .apply_batch(&[
                TransactionOperation::text("a.md", "1"),
                TransactionOperation::text("./a.md", "2"),
            ])
            .unwrap_err();
        match err {
            DriftguardError::ValidationFailed { issues } => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].contains("duplicate"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_absolute_operation_paths() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let target = other.path().join("outside.md");

        TransactionManager::new(temp_dir.path())
            .apply_batch(&[TransactionOperation::text(target.clone(), "abs")])
            .unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "abs");
    }

    #[test]
    fn test_custom_tool_dir() {
        let temp_dir = TempDir::new().unwrap();
        let engine = EngineBuilder::new()
            .tool_dir(".state")
            .metadata_file("meta.json")
            .backups_dir("snapshots")
            .build(temp_dir.path())
            .unwrap();

        engine
            .install(&MemorySource::new("1.0.0").with_file("a.md", "a"), false)
            .unwrap();
        assert!(temp_dir.path().join(".state/meta.json").exists());

        let outcome = engine.backups().create_full_backup("manual").unwrap();
        assert!(outcome.path.starts_with(temp_dir.path().join(".state/snapshots")));
        assert!(outcome.path.join("meta.json").exists());
        assert!(engine.status().unwrap().untracked.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_replaced_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real.md");
        let link = temp_dir.path().join("link.md");
        fs::write(&real, "real").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        AtomicWriter::new()
            .write(&link, b"new", &WriteOptions::default())
            .unwrap();

        assert_eq!(fs::read_to_string(&real).unwrap(), "real");
        assert!(!fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&link).unwrap(), "new");
    }
}

// Re-export test utilities for use in other suites
pub use integration::{PackageGenerator, ProjectHarness};
