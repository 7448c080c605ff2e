//! Tests for change notifications
//!
//! These tests verify:
//! - One record per changed key, in commit order, after the commit
//! - Failing observers do not fail the mutation
//! - No record for a mutation that changed nothing or failed
//! - A mutation from inside an observer fails instead of blocking

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use localkv::{ChangeRecord, ErrorKind, Store};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::{builder, open_store};

fn summary(records: &[ChangeRecord]) -> Vec<(String, bool, bool)> {
    records
        .iter()
        .map(|r| {
            (
                String::from_utf8(r.key.to_vec()).unwrap(),
                r.old_value_present,
                r.new_value_present,
            )
        })
        .collect()
}

#[test]
fn test_records_follow_commit_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let (_id, rx) = store.subscribe_channel();

    store.set(b"a", b"1").unwrap();
    store.set(b"a", b"2").unwrap();
    store.set(b"b", b"1").unwrap();
    store.remove(b"a").unwrap();

    let records: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        summary(&records),
        vec![
            ("a".to_string(), false, true),
            ("a".to_string(), true, true),
            ("b".to_string(), false, true),
            ("a".to_string(), true, false),
        ]
    );
    let lsns: Vec<_> = records.iter().map(|r| r.lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3, 4]);
}

#[test]
fn test_clear_emits_one_record_per_key() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.multi_set(&[("b", "1"), ("a", "2")]).unwrap();

    let (_id, rx) = store.subscribe_channel();
    store.clear().unwrap();
    store.clear().unwrap();

    let records: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        summary(&records),
        vec![("a".to_string(), true, false), ("b".to_string(), true, false)]
    );
    assert!(records.iter().all(|r| r.lsn == records[0].lsn));
}

#[test]
fn test_batch_records_share_lsn() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.set(b"x", b"0").unwrap();

    let (_id, rx) = store.subscribe_channel();
    store.multi_set(&[("x", "1"), ("y", "2")]).unwrap();

    let records: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        summary(&records),
        vec![("x".to_string(), true, true), ("y".to_string(), false, true)]
    );
    assert_eq!(records[0].lsn, records[1].lsn);
}

#[test]
fn test_observer_sees_committed_state() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let reader = Arc::clone(&store);
    let sink = Arc::clone(&seen);
    store.subscribe(move |r: &ChangeRecord| {
        sink.lock().push(reader.get(&r.key).unwrap());
    });

    store.set(b"k", b"v").unwrap();
    store.remove(b"k").unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0].as_deref(), Some(&b"v"[..]));
    assert_eq!(seen[1], None);
}

#[test]
fn test_observer_cannot_mutate_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let inner = Arc::clone(&store);
    let sink = Arc::clone(&outcomes);
    store.subscribe(move |r: &ChangeRecord| {
        if r.key.as_ref() == b"trigger" {
            let set = inner.set(b"echo", b"1").map_err(|e| e.kind());
            let compact = inner.compact().map(|_| ()).map_err(|e| e.kind());
            sink.lock().push((set, compact));
        }
    });

    // Run on another thread so a regression fails the test instead of
    // hanging it
    let (done_tx, done_rx) = channel::bounded(1);
    let writer = Arc::clone(&store);
    thread::spawn(move || {
        let _ = done_tx.send(writer.set(b"trigger", b"go").map_err(|e| e.kind()));
    });
    let outer = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(outer, Ok(()));
    assert_eq!(
        outcomes.lock().as_slice(),
        &[(Err(ErrorKind::ReentrantWrite), Err(ErrorKind::ReentrantWrite))]
    );
    assert!(store.get(b"echo").unwrap().is_none());

    // The writer region is free again once the outer commit returns
    store.set(b"after", b"1").unwrap();
    assert_eq!(store.len(), 2);
}

#[test]
fn test_panicking_observer_does_not_fail_mutation() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.subscribe(|_: &ChangeRecord| panic!("observer bug"));
    let (_id, rx) = store.subscribe_channel();

    store.set(b"k", b"v").unwrap();

    assert_eq!(store.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
    assert_eq!(rx.try_iter().count(), 1);
}

#[test]
fn test_no_record_for_noop_or_failure() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(builder(&dir).max_value_size(2).build()).unwrap();
    let (_id, rx) = store.subscribe_channel();

    store.remove(b"missing").unwrap();
    store.set(b"k", b"too big").unwrap_err();
    store.multi_set(&[("a", "1"), ("", "2")]).unwrap_err();

    assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn test_unsubscribe() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let (id, rx) = store.subscribe_channel();

    store.set(b"a", b"1").unwrap();
    assert!(store.unsubscribe(id));
    store.set(b"b", b"2").unwrap();

    assert_eq!(rx.try_iter().count(), 1);
}
