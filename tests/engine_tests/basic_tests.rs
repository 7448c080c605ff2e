//! Tests for single-key operations
//!
//! These tests verify:
//! - get/set/remove/clear semantics and key ordering
//! - Validation at the boundary (empty keys, size limits, quota)
//! - Byte-accurate values, inline and out-of-line

use localkv::{ErrorKind, Store, StoreError};
use tempfile::TempDir;

use crate::{builder, keys, open_store, value};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_remove_clear_scenario() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.set(b"a", b"1").unwrap();
    store.set(b"b", b"2").unwrap();
    assert_eq!(keys(&store), vec!["a", "b"]);

    store.remove(b"a").unwrap();
    assert_eq!(value(&store, "a"), None);
    assert_eq!(value(&store, "b").as_deref(), Some("2"));

    store.clear().unwrap();
    assert!(keys(&store).is_empty());
    assert!(store.is_empty());
}

#[test]
fn test_keys_are_byte_ordered() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for key in ["zeta", "Alpha", "beta", "a", "ab"] {
        store.set(key.as_bytes(), b"v").unwrap();
    }

    assert_eq!(keys(&store), vec!["Alpha", "a", "ab", "beta", "zeta"]);
}

#[test]
fn test_overwrite_keeps_last_value() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.set(b"k", b"first").unwrap();
    store.set(b"k", b"second").unwrap();

    assert_eq!(value(&store, "k").as_deref(), Some("second"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_binary_values_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let key = [0xFFu8, 0x00, 0x80];
    let bytes: Vec<u8> = (0..=255u8).collect();
    store.set(&key, &bytes).unwrap();

    assert_eq!(store.get(&key).unwrap().unwrap().as_ref(), bytes.as_slice());
}

#[test]
fn test_empty_value_is_present() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.set(b"k", b"").unwrap();

    assert_eq!(store.get(b"k").unwrap().map(|v| v.len()), Some(0));
    assert!(store.contains_key(b"k"));
}

#[test]
fn test_remove_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.set(b"k", b"v").unwrap();
    store.remove(b"k").unwrap();
    let after_first = store.stats();
    store.remove(b"k").unwrap();

    assert_eq!(value(&store, "k"), None);
    // An absent key writes nothing
    assert_eq!(store.stats(), after_first);
}

#[test]
fn test_clear_twice_leaves_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.set(b"a", b"1").unwrap();
    store.clear().unwrap();
    store.clear().unwrap();

    assert!(store.is_empty());
    assert_eq!(store.stats().data_size, 0);
}

#[test]
fn test_nothing_on_disk_until_first_write() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    assert_eq!(store.get(b"k").unwrap(), None);
    store.remove(b"k").unwrap();
    assert!(!dir.path().join("test").exists());

    store.set(b"k", b"v").unwrap();
    assert!(dir.path().join("test").join("data.log").exists());
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_empty_key_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    assert_eq!(store.set(b"", b"v").unwrap_err().kind(), ErrorKind::InvalidKey);
    assert_eq!(store.get(b"").unwrap_err().kind(), ErrorKind::InvalidKey);
    assert_eq!(store.remove(b"").unwrap_err().kind(), ErrorKind::InvalidKey);
}

#[test]
fn test_value_too_large() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).max_value_size(8).build()).unwrap();

    store.set(b"ok", &[1u8; 8]).unwrap();
    let err = store.set(b"big", &[1u8; 9]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
    assert!(matches!(err, StoreError::ValueTooLarge { size: 9, limit: 8, .. }));
    assert_eq!(value(&store, "big"), None);
}

#[test]
fn test_quota_exceeded() {
    let dir = TempDir::new().unwrap();
    // "a" + 9 bytes = 10
    let store = Store::open(builder(&dir).max_total_size(15).build()).unwrap();

    store.set(b"a", &[0u8; 9]).unwrap();
    let err = store.set(b"b", &[0u8; 9]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert!(matches!(err, StoreError::QuotaExceeded { required: 20, limit: 15 }));

    // Replacing a value counts only the difference
    store.set(b"a", &[0u8; 14]).unwrap();
    assert_eq!(store.stats().data_size, 15);
}

#[test]
fn test_shrinking_allowed_over_quota() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).build()).unwrap();
    store.set(b"a", &[0u8; 99]).unwrap();
    drop(store);

    // Reopen with a quota smaller than what is already stored
    let store = Store::open(builder(&dir).max_total_size(10).build()).unwrap();
    store.set(b"a", &[0u8; 50]).unwrap();
    assert_eq!(store.set(b"b", b"x").unwrap_err().kind(), ErrorKind::QuotaExceeded);
    store.remove(b"a").unwrap();
    store.set(b"b", b"x").unwrap();
}

#[test]
fn test_invalid_namespace_rejected() {
    let dir = TempDir::new().unwrap();
    let err = Store::open(builder(&dir).namespace("../other").build()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}

// =============================================================================
// Out-of-line Values
// =============================================================================

#[test]
fn test_large_values_read_from_log() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).inline_value_limit(16).build()).unwrap();

    let small = b"tiny".to_vec();
    let large: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    store.set(b"small", &small).unwrap();
    store.set(b"large", &large).unwrap();

    assert_eq!(store.get(b"small").unwrap().unwrap().as_ref(), small.as_slice());
    assert_eq!(store.get(b"large").unwrap().unwrap().as_ref(), large.as_slice());
    assert_eq!(store.stats().data_size, (5 + 4 + 5 + 10_000) as u64);
}

#[test]
fn test_multi_get_preserves_order() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).inline_value_limit(2).build()).unwrap();

    store.set(b"a", b"1").unwrap();
    store.set(b"c", b"long value").unwrap();

    let values = store.multi_get(&["c", "b", "a"]).unwrap();
    let values: Vec<_> = values.iter().map(|v| v.as_deref()).collect();
    assert_eq!(
        values,
        vec![Some(&b"long value"[..]), None, Some(&b"1"[..])]
    );

    let err = store.multi_get(&["a", ""]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
}
