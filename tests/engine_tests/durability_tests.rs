//! Tests for durability and crash recovery
//!
//! These tests verify:
//! - Committed writes survive a reopen
//! - A torn final record is discarded silently
//! - Mid-log damage is handled per the configured recovery policy
//! - A recovery that cannot repair the log leaves the store read-only

use std::io::Write;
use std::path::PathBuf;

use localkv::{ErrorKind, ReadFailurePolicy, RecoveryAction, RecoveryPolicy, Store};
use tempfile::TempDir;

use crate::{builder, keys, open_store, value};

fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("test").join("data.log")
}

/// Write `a`, `b`, `c` and return the log offset where `b`'s record starts
fn write_three(dir: &TempDir) -> u64 {
    let store = open_store(dir);
    store.set(b"a", b"1").unwrap();
    let offset = store.stats().log_size;
    store.set(b"b", b"2").unwrap();
    store.set(b"c", b"3").unwrap();
    offset
}

fn damage_byte(dir: &TempDir, offset: u64) {
    let path = log_path(dir);
    let mut bytes = std::fs::read(&path).unwrap();
    // Past the 20-byte header, inside the body
    bytes[offset as usize + 24] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_writes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"3").unwrap();
        store.remove(b"b").unwrap();
        store.set(b"c", b"4").unwrap();
        store.close().unwrap();
    }

    let store = open_store(&dir);
    assert_eq!(keys(&store), vec!["a", "c"]);
    assert_eq!(value(&store, "a").as_deref(), Some("3"));
    assert_eq!(store.recovery_report().action, RecoveryAction::Clean);
    assert_eq!(store.recovery_report().result.entries_recovered, 5);
}

#[test]
fn test_clear_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        store.set(b"a", b"1").unwrap();
        store.clear().unwrap();
        store.set(b"b", b"2").unwrap();
    }

    let store = open_store(&dir);
    assert_eq!(keys(&store), vec!["b"]);
}

#[test]
fn test_lsn_continues_after_reopen() {
    let dir = TempDir::new().unwrap();
    write_three(&dir);

    let store = open_store(&dir);
    assert_eq!(store.stats().next_lsn, 4);
}

#[test]
fn test_namespaces_have_separate_logs() {
    let dir = TempDir::new().unwrap();
    let one = Store::open(builder(&dir).namespace("one").build()).unwrap();
    let two = Store::open(builder(&dir).namespace("two").build()).unwrap();

    one.set(b"k", b"1").unwrap();
    two.set(b"k", b"2").unwrap();

    assert_eq!(value(&one, "k").as_deref(), Some("1"));
    assert_eq!(value(&two, "k").as_deref(), Some("2"));
    assert!(dir.path().join("one").join("data.log").exists());
    assert!(dir.path().join("two").join("data.log").exists());
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_is_discarded() {
    let dir = TempDir::new().unwrap();
    write_three(&dir);
    let clean_len = std::fs::metadata(log_path(&dir)).unwrap().len();

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(log_path(&dir))
        .unwrap();
    file.write_all(&[0x05, 0, 0, 0, 0, 0, 0, 0, 0xAA]).unwrap();
    drop(file);

    let store = open_store(&dir);
    assert_eq!(keys(&store), vec!["a", "b", "c"]);
    assert_eq!(store.recovery_report().action, RecoveryAction::Clean);
    assert!(store.recovery_report().result.was_truncated);
    assert_eq!(std::fs::metadata(log_path(&dir)).unwrap().len(), clean_len);

    store.set(b"d", b"4").unwrap();
    drop(store);
    assert_eq!(keys(&open_store(&dir)), vec!["a", "b", "c", "d"]);
}

// =============================================================================
// Corruption Policy Tests
// =============================================================================

#[test]
fn test_keep_valid_prefix() {
    let dir = TempDir::new().unwrap();
    let offset = write_three(&dir);
    damage_byte(&dir, offset);

    let store = open_store(&dir);
    let report = store.recovery_report().clone();

    assert_eq!(report.action, RecoveryAction::KeptValidPrefix);
    assert!(report.result.is_corrupt());
    assert_eq!(keys(&store), vec!["a"]);
    assert_eq!(std::fs::metadata(log_path(&dir)).unwrap().len(), offset);

    let backup = report.backup_path.unwrap();
    assert!(backup.exists());
    assert!(std::fs::metadata(&backup).unwrap().len() > offset);

    // The store keeps working from the recovered prefix
    store.set(b"d", b"4").unwrap();
    drop(store);
    assert_eq!(keys(&open_store(&dir)), vec!["a", "d"]);
}

#[test]
fn test_fail_fast() {
    let dir = TempDir::new().unwrap();
    let offset = write_three(&dir);
    damage_byte(&dir, offset);
    let len_before = std::fs::metadata(log_path(&dir)).unwrap().len();

    let config = builder(&dir).recovery_policy(RecoveryPolicy::FailFast).build();
    let err = Store::open(config).err().unwrap();

    assert_eq!(err.kind(), ErrorKind::CorruptionDetected);
    assert_eq!(std::fs::metadata(log_path(&dir)).unwrap().len(), len_before);
}

#[test]
fn test_fail_fast_on_damaged_length() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        for i in 0..11 {
            store.set(format!("key{:02}", i).as_bytes(), b"value").unwrap();
        }
    }
    let path = log_path(&dir);
    let len_before = std::fs::metadata(&path).unwrap().len();

    // Length field in the second record's header
    let mut bytes = std::fs::read(&path).unwrap();
    let first_len = len_before as usize / 11;
    bytes[first_len + 14] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let config = builder(&dir).recovery_policy(RecoveryPolicy::FailFast).build();
    let err = Store::open(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CorruptionDetected);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);

    // The default policy keeps a backup of everything it cuts
    let store = open_store(&dir);
    assert_eq!(store.recovery_report().action, RecoveryAction::KeptValidPrefix);
    let backup = store.recovery_report().backup_path.clone().unwrap();
    assert_eq!(std::fs::metadata(backup).unwrap().len(), len_before);
}

#[test]
fn test_start_empty() {
    let dir = TempDir::new().unwrap();
    let offset = write_three(&dir);
    damage_byte(&dir, offset);

    let config = builder(&dir).recovery_policy(RecoveryPolicy::StartEmpty).build();
    let store = Store::open(config).unwrap();

    assert_eq!(store.recovery_report().action, RecoveryAction::StartedEmpty);
    assert!(store.is_empty());
    assert!(!log_path(&dir).exists());

    store.set(b"fresh", b"1").unwrap();
    assert_eq!(keys(&store), vec!["fresh"]);
}

#[cfg(unix)]
#[test]
fn test_failed_recovery_leaves_store_read_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let offset = write_three(&dir);
    damage_byte(&dir, offset);

    // Without write permission on the directory the damaged log cannot be
    // moved aside
    let store_dir = dir.path().join("test");
    std::fs::set_permissions(&store_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

    let config = builder(&dir).recovery_policy(RecoveryPolicy::StartEmpty).build();
    let opened = Store::open(config);
    std::fs::set_permissions(&store_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    let store = opened.unwrap();

    // Permission bits do not bind a privileged user
    if store.recovery_report().action == RecoveryAction::StartedEmpty {
        return;
    }

    assert!(store.is_read_only());
    assert!(store.is_empty());
    let err = store.set(b"k", b"v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptionDetected);
    assert!(store.get(b"a").unwrap().is_none());
}

#[test]
fn test_rebuild_index_matches_log() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.set(b"a", b"1").unwrap();
    store.set(b"b", b"2").unwrap();
    store.remove(b"a").unwrap();

    store.rebuild_index().unwrap();

    assert_eq!(keys(&store), vec!["b"]);
    assert_eq!(value(&store, "b").as_deref(), Some("2"));
}

// =============================================================================
// Read Failure Policy Tests
// =============================================================================

#[test]
fn test_damaged_out_of_line_value_propagates() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).inline_value_limit(0).build()).unwrap();
    store.set(b"a", b"value-a").unwrap();

    damage_byte(&dir, 0);

    let err = store.get(b"a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptionDetected);
}

#[cfg(unix)]
#[test]
fn test_treat_as_absent_on_io_failure() {
    let dir = TempDir::new().unwrap();
    let config = builder(&dir)
        .inline_value_limit(0)
        .read_failure_policy(ReadFailurePolicy::TreatAsAbsent)
        .build();
    let store = Store::open(config).unwrap();
    store.set(b"a", b"value-a").unwrap();

    // Reads past the end of the file fail with an I/O error
    let file = std::fs::OpenOptions::new().write(true).open(log_path(&dir)).unwrap();
    file.set_len(4).unwrap();
    drop(file);

    assert_eq!(store.get(b"a").unwrap(), None);
}
