//! Integration tests for Driftguard
//!
//! Tests full lifecycles: install, local edits, several updates, backups,
//! and restores, over generated packages of many files.

use ::driftguard::*;
use tempfile::TempDir;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::info;

/// Test harness around one project root
pub struct ProjectHarness {
    pub temp_dir: TempDir,
    pub engine: Engine,
    pub generator: PackageGenerator,
}

impl ProjectHarness {
    /// Create a harness treating `specs/**` as user content
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let engine = EngineBuilder::new()
            .user_content_patterns(vec!["specs/**".to_string()])
            .sync_writes(false)
            .build(temp_dir.path())
            .unwrap();

        Self {
            temp_dir,
            engine,
            generator: PackageGenerator::new(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.root().join(path)).unwrap()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.root().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    /// Names of leftover temporary files anywhere under the root
    pub fn leftover_temp_files(&self) -> Vec<String> {
        walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| utils::is_temp_file_name(name))
            .collect()
    }

    /// Assert every file in `source` has exactly its source content on disk
    pub fn assert_matches(&self, source: &MemorySource) {
        for path in source.paths().unwrap() {
            let expected = source.content(&path).unwrap();
            let actual = fs::read(self.root().join(&path)).unwrap();
            assert_eq!(actual, expected, "content mismatch for {}", path);
        }
    }
}

impl Default for ProjectHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic generator of package versions
pub struct PackageGenerator {
    pub rng: StdRng,
}

impl PackageGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate `count` files spread over a few directories
    pub fn generate_package(&mut self, version: &str, count: usize) -> MemorySource {
        let mut source = MemorySource::new(version);
        for i in 0..count {
            let dir = ["agents", "commands", "templates/deep"][i % 3];
            let path = format!("{}/file_{}.md", dir, i);
            source.insert(path, self.content(version, i));
        }
        source
    }

    /// Same paths as `base`, every file's content changed for `version`
    pub fn next_version(&mut self, base: &MemorySource, version: &str) -> MemorySource {
        let mut source = MemorySource::new(version);
        for (i, path) in base.paths().unwrap().into_iter().enumerate() {
            source.insert(path, self.content(version, i));
        }
        source
    }

    fn content(&mut self, version: &str, index: usize) -> String {
        let lines = self.rng.random_range(1..20);
        let mut content = format!("# File {} (version {})\n", index, version);
        for _ in 0..lines {
            let n: u32 = self.rng.random();
            content.push_str(&format!("line {}\n", n));
        }
        content
    }
}

#[test]
fn test_full_lifecycle() {
    let mut harness = ProjectHarness::new();
    let v1 = harness.generator.generate_package("1.0.0", 30);
    let v2 = harness.generator.next_version(&v1, "2.0.0");

    let report = harness.engine.install(&v1, false).unwrap();
    assert_eq!(report.written(), 30);
    harness.assert_matches(&v1);

    // User edits one file and deletes another
    harness.write("agents/file_0.md", "my notes");
    fs::remove_file(harness.root().join("commands/file_1.md")).unwrap();

    let report = harness.engine.apply_update(&v2, &ApplyOptions::default()).unwrap();
    assert_eq!(report.written(), 28);
    assert_eq!(report.skipped(), 2);
    assert_eq!(harness.read("agents/file_0.md"), "my notes");
    assert!(!harness.root().join("commands/file_1.md").exists());
    assert_eq!(
        harness.read("templates/deep/file_2.md"),
        String::from_utf8(v2.content("templates/deep/file_2.md").unwrap()).unwrap()
    );

    let status = harness.engine.status().unwrap();
    assert_eq!(status.installed_version, "2.0.0");
    assert_eq!(status.count("modified"), 1);
    assert_eq!(status.count("user_deleted"), 1);
    assert_eq!(status.count("unchanged"), 28);

    // Roll back to the pre-update backup
    let backup = report.backup.unwrap();
    let restore = harness.engine.backups().restore_from_backup(&backup.path).unwrap();
    assert_eq!(restore.version, "1.0.0");
    assert!(restore.metadata_restored);
    assert_eq!(harness.engine.status().unwrap().installed_version, "1.0.0");
    assert_eq!(
        harness.read("templates/deep/file_2.md"),
        String::from_utf8(v1.content("templates/deep/file_2.md").unwrap()).unwrap()
    );
    assert!(harness.leftover_temp_files().is_empty());

    info!("Lifecycle complete");
}

#[test]
fn test_three_updates_keep_history_of_backups() {
    let mut harness = ProjectHarness::new();
    let v1 = harness.generator.generate_package("1.0.0", 9);
    harness.engine.install(&v1, false).unwrap();

    let mut previous = v1;
    for version in ["1.1.0", "1.2.0", "2.0.0"] {
        let next = harness.generator.next_version(&previous, version);
        harness.engine.apply_update(&next, &ApplyOptions::default()).unwrap();
        harness.assert_matches(&next);
        previous = next;
    }

    let backups = harness.engine.backups().list_backups().unwrap();
    let versions: Vec<&str> = backups.iter().map(|b| b.manifest.version.as_str()).collect();
    assert_eq!(versions, vec!["1.2.0", "1.1.0", "1.0.0"]);

    let metadata = harness.engine.store().load_required().unwrap();
    assert_eq!(metadata.installed_version, "2.0.0");
    for record in metadata.files.values() {
        assert_eq!(record.updated_to_version.as_deref(), Some("2.0.0"));
    }

    harness.engine.backups().prune_backups(1).unwrap();
    assert_eq!(harness.engine.backups().list_backups().unwrap().len(), 1);
}

#[test]
fn test_user_content_never_touched() {
    let harness = ProjectHarness::new();
    harness.write("specs/product.md", "my product");

    let v1 = MemorySource::new("1.0.0")
        .with_file("specs/product.md", "template")
        .with_file("agents/a.md", "a");
    let report = harness.engine.install(&v1, true).unwrap();

    assert_eq!(
        report.plan.entry("specs/product.md").unwrap().action,
        UpdateAction::Skip { reason: SkipReason::UserContent }
    );
    assert_eq!(harness.read("specs/product.md"), "my product");

    let backup = harness.engine.backups().create_full_backup("manual").unwrap();
    assert_eq!(backup.manifest.files, vec!["agents/a.md".to_string()]);

    let status = harness.engine.status().unwrap();
    assert_eq!(status.untracked, vec!["specs/product.md".to_string()]);
}

#[test]
fn test_directory_source_install() {
    let harness = ProjectHarness::new();
    let package = TempDir::new().unwrap();
    fs::create_dir_all(package.path().join("agents/nested")).unwrap();
    fs::write(package.path().join("agents/nested/x.md"), "x").unwrap();
    fs::write(package.path().join("README.md"), "readme").unwrap();

    let source = DirectorySource::new(package.path(), "3.1.4");
    harness.engine.install(&source, false).unwrap();

    assert_eq!(harness.read("agents/nested/x.md"), "x");
    let metadata = harness.engine.store().load_required().unwrap();
    let keys: Vec<&String> = metadata.files.keys().collect();
    assert_eq!(keys, vec!["README.md", "agents/nested/x.md"]);
    assert_eq!(metadata.files["README.md"].hash, hash_bytes(b"readme"));
}

#[test]
fn test_files_dropped_from_package_stay_tracked() {
    let harness = ProjectHarness::new();
    let v1 = MemorySource::new("1.0.0")
        .with_file("keep.md", "k1")
        .with_file("retired.md", "r1");
    let v2 = MemorySource::new("2.0.0").with_file("keep.md", "k2");

    harness.engine.install(&v1, false).unwrap();
    harness.engine.apply_update(&v2, &ApplyOptions::default()).unwrap();

    assert_eq!(harness.read("retired.md"), "r1");
    let statuses: BTreeMap<String, DriftStatus> = harness.engine.detector().classify_all().unwrap();
    assert_eq!(statuses["retired.md"], DriftStatus::Unchanged);
    assert_eq!(statuses["keep.md"], DriftStatus::Unchanged);
}

#[test]
fn test_restore_after_failed_manual_edits() {
    let harness = ProjectHarness::new();
    let v1 = MemorySource::new("1.0.0")
        .with_file("a.md", "a1")
        .with_file("nested/b.md", "b1");
    harness.engine.install(&v1, false).unwrap();
    let backup = harness.engine.backups().create_full_backup("before experiments").unwrap();

    fs::remove_dir_all(harness.root().join("nested")).unwrap();
    harness.write("a.md", "broken");

    let result = harness
        .engine
        .backups()
        .restore_from_backup(&backup.path)
        .unwrap()
        .ensure_complete()
        .unwrap();
    assert_eq!(result.restored, 2);
    harness.assert_matches(&v1);
    assert!(harness.engine.status().unwrap().is_clean());
}
