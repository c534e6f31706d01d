//! Cleanup runs against real directory trees.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::{FileTime, set_file_times};
use workspace_tooling::core::config::Config;
use workspace_tooling::core::errors::WstError;
use workspace_tooling::monitor::measure::{MeasurePlan, UsageMeasurer};
use workspace_tooling::monitor::metadata::MetadataStore;
use workspace_tooling::platform::disk_usage::MockDiskUsage;
use workspace_tooling::scanner::cleanup::{CleanupEngine, CleanupLock, CleanupPolicy, tombstone_path};

const MIB: usize = 1024 * 1024;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn write_file(path: &Path, bytes: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![7_u8; bytes]).unwrap();
}

fn age(path: &Path, days: u64) {
    let when = FileTime::from_system_time(SystemTime::now() - DAY * u32::try_from(days).unwrap());
    set_file_times(path, when, when).unwrap();
}

/// Ten days from now, so even the ctime of freshly written files is old.
fn later() -> SystemTime {
    SystemTime::now() + DAY * 10
}

#[test]
fn removes_only_large_inactive_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_file(&root.join("big.bin"), 3 * MIB);
    write_file(&root.join("nested/deeper/big.dat"), 2 * MIB);
    write_file(&root.join("small.txt"), 100);

    let mut policy = CleanupPolicy::new(root);
    policy.max_file_size_mb = Some(1);
    let report = CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();

    assert_eq!(report.files_visited, 3);
    assert_eq!(report.files_removed, 2);
    assert_eq!(report.megabytes_freed, 5);
    assert!(report.failures.is_empty());
    assert!(report.metadata.is_none());

    assert!(!root.join("big.bin").exists());
    assert!(!root.join("nested/deeper/big.dat").exists());
    assert!(root.join("small.txt").exists());
}

#[test]
fn tombstone_explains_removal() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("model.ckpt");
    write_file(&file, 2 * MIB);

    let mut policy = CleanupPolicy::new(dir.path());
    policy.max_file_size_mb = Some(1);
    policy.min_inactivity_days = 3;
    CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();

    let note = fs::read_to_string(tombstone_path(&file)).unwrap();
    assert!(note.starts_with("File has been removed during folder cleaning ("));
    assert!(note.contains("The file size was 2 MB (max 1). "));
    assert!(note.contains("days ago (max 3). "));

    // A second run leaves the tombstone alone.
    let again = CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();
    assert_eq!(again.files_removed, 0);
    assert_eq!(again.files_visited, 1);
    assert!(tombstone_path(&file).exists());
}

#[test]
fn unwritable_tombstone_does_not_fail_the_removal() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("model.ckpt");
    write_file(&file, 2 * MIB);
    // A directory in the marker's place makes the write fail.
    fs::create_dir(tombstone_path(&file)).unwrap();

    let mut policy = CleanupPolicy::new(dir.path());
    policy.max_file_size_mb = Some(1);
    let report = CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();

    assert!(!file.exists());
    assert_eq!(report.files_removed, 1);
    assert_eq!(report.megabytes_freed, 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.tombstone_failures.len(), 1);
    assert_eq!(report.tombstone_failures[0].path, tombstone_path(&file));
}

#[test]
fn recently_used_files_survive() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("old.bin");
    let fresh = dir.path().join("fresh.bin");
    write_file(&old, 2 * MIB);
    write_file(&fresh, 2 * MIB);
    age(&old, 30);

    let mut policy = CleanupPolicy::new(dir.path());
    policy.max_file_size_mb = Some(1);
    policy.min_inactivity_days = 5;
    // ctime is always recent, so real "now" keeps both files.
    let report = CleanupEngine::new(None, None).cleanup(&policy).unwrap();
    assert_eq!(report.files_removed, 0);
    assert!(old.exists() && fresh.exists());
}

#[test]
fn excluded_folders_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("node_modules/pkg/huge.js"), 2 * MIB);
    write_file(&dir.path().join("src/.git/objects/pack.pack"), 2 * MIB);
    write_file(&dir.path().join("src/data.bin"), 2 * MIB);

    let mut policy = CleanupPolicy::new(dir.path());
    policy.max_file_size_mb = Some(1);
    policy.excluded_folder_names = vec!["node_modules".to_string(), ".git".to_string()];
    let report = CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();

    assert_eq!(report.files_removed, 1);
    assert!(dir.path().join("node_modules/pkg/huge.js").exists());
    assert!(dir.path().join("src/.git/objects/pack.pack").exists());
    assert!(!dir.path().join("src/data.bin").exists());
}

#[test]
fn without_tombstones_nothing_is_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("dump.sql");
    write_file(&file, 2 * MIB);

    let mut policy = CleanupPolicy::new(dir.path());
    policy.max_file_size_mb = Some(1);
    policy.replace_with_tombstone = false;
    let report = CleanupEngine::new(None, None).cleanup_at(&policy, later()).unwrap();

    assert_eq!(report.files_removed, 1);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn overlapping_cleanup_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let inner = dir.path().join("inner");
    write_file(&inner.join("big.bin"), 2 * MIB);

    let root = fs::canonicalize(dir.path()).unwrap();
    let _held = CleanupLock::acquire(&root).unwrap();

    let mut policy = CleanupPolicy::new(&inner);
    policy.max_file_size_mb = Some(1);
    let error = CleanupEngine::new(None, None)
        .cleanup_at(&policy, later())
        .unwrap_err();
    assert!(matches!(error, WstError::CleanupInProgress { .. }), "{error}");
    assert!(inner.join("big.bin").exists());
}

#[test]
fn missing_folder_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let policy = CleanupPolicy::new(dir.path().join("absent"));
    let error = CleanupEngine::new(None, None).cleanup(&policy).unwrap_err();
    assert_eq!(error.code(), "WST-3002");
}

#[test]
fn report_carries_refreshed_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    write_file(&workspace.join("weights.bin"), 2 * MIB);

    let mut config = Config::default();
    config.storage.max_workspace_folder_size_gb = Some(10);
    let du = Arc::new(MockDiskUsage::new().with_size(&workspace, 1234));
    let store = MetadataStore::new(dir.path().join("metadata.json"));
    let measurer = UsageMeasurer::new(
        du,
        store.clone(),
        MeasurePlan::for_limits(&config.storage, workspace.clone()),
        None,
    );

    let mut policy = CleanupPolicy::new(&workspace);
    policy.max_file_size_mb = Some(1);
    let report = CleanupEngine::new(Some(Arc::new(measurer)), None)
        .cleanup_at(&policy, later())
        .unwrap();

    assert_eq!(report.files_removed, 1);
    let metadata = report.metadata.as_ref().expect("refreshed snapshot");
    assert_eq!(metadata.workspace_size_kb, Some(1234));
    assert_eq!(store.read().as_ref(), Some(metadata));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["filesRemoved"], 1);
    assert_eq!(json["metadata"]["workspace_folder_size_in_kb"], 1234);
}
