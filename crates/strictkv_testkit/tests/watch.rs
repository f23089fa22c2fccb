//! Integration tests for watches.

use std::thread;
use std::time::Duration;
use strictkv_core::{codes, Error, Result};
use strictkv_testkit::prelude::*;

#[test]
fn watch_fires_on_a_later_change() {
    let db = TestDatabase::memory();
    let watch = db.set_and_watch(b"k", b"1").unwrap();
    assert!(!watch.is_ready());

    db.set(b"k", b"1").unwrap();
    assert!(!watch.is_ready());

    db.set(b"k", b"2").unwrap();
    watch.get().unwrap();
}

#[test]
fn watch_outlives_its_transaction() {
    let db = TestDatabase::memory();
    let (value, watch) = db.get_and_watch(b"k").unwrap();
    assert_eq!(value, None);
    assert_eq!(db.engine().open_transactions(), 0);
    assert_eq!(db.engine().live_watches(), 1);

    db.set(b"k", b"now").unwrap();
    watch.get().unwrap();
    assert_eq!(db.engine().live_watches(), 0);
}

#[test]
fn only_the_committed_attempt_registers_a_watch() {
    let db = TestDatabase::memory();
    db.backend
        .fail_next_commits([codes::NOT_COMMITTED, codes::COMMIT_UNKNOWN_RESULT]);

    let watch = db.set_and_watch(b"k", b"v").unwrap();

    assert_eq!(db.backend.calls().create_transaction, 3);
    assert_eq!(db.engine().live_watches(), 1);
    db.set(b"k", b"changed").unwrap();
    watch.get().unwrap();
}

#[test]
fn watch_of_a_failed_commit_fails_with_the_commit_error() {
    let db = TestDatabase::memory();
    let tr = db.create_transaction().unwrap();
    tr.get(b"k").get().unwrap();
    let watch = tr.watch(b"k");

    db.set(b"k", b"concurrent").unwrap();
    tr.set(b"k", b"mine");
    let err = tr.commit().get().unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(watch.get().unwrap_err().code(), codes::NOT_COMMITTED);
    assert_eq!(db.engine().live_watches(), 0);
}

#[test]
fn reset_fails_pending_watches() {
    let db = TestDatabase::memory();
    let tr = db.create_transaction().unwrap();
    let watch = tr.watch(b"k");
    tr.reset();
    assert_eq!(watch.get().unwrap_err().code(), codes::TRANSACTION_CANCELLED);
}

#[test]
fn dropping_the_transaction_fails_pending_watches() {
    let db = TestDatabase::memory();
    let watch = {
        let tr = db.create_transaction().unwrap();
        tr.watch(b"k")
    };
    assert_eq!(watch.get().unwrap_err().code(), codes::TRANSACTION_CANCELLED);
}

#[test]
fn cancelled_and_dropped_watches_are_pruned() {
    let db = TestDatabase::memory();
    let kept = db.set_and_watch(b"a", b"1").unwrap();
    let cancelled = db.set_and_watch(b"b", b"1").unwrap();
    let dropped = db.set_and_watch(b"c", b"1").unwrap();
    assert_eq!(db.engine().live_watches(), 3);

    cancelled.cancel();
    drop(dropped);
    assert_eq!(db.engine().live_watches(), 1);
    assert!(matches!(cancelled.get(), Err(Error::OperationCancelled)));

    db.set(b"a", b"2").unwrap();
    kept.get().unwrap();
}

#[test]
fn watch_fires_across_threads() {
    let db = TestDatabase::threaded(Duration::from_millis(1));
    let watch = db.set_and_watch(b"k", b"0").unwrap();

    let waiter = thread::spawn(move || watch.get());
    thread::sleep(Duration::from_millis(10));
    db.transact(|tr| -> Result<()> {
        tr.set(b"k", b"1");
        Ok(())
    })
    .unwrap();

    waiter.join().unwrap().unwrap();
}

#[test]
fn max_watches_bounds_registration() {
    let db = TestDatabase::memory();
    db.options().set_max_watches(1).unwrap();

    let _first = db.set_and_watch(b"a", b"1").unwrap();
    let second = db.set_and_watch(b"b", b"1").unwrap();
    assert_eq!(second.get().unwrap_err().code(), codes::TOO_MANY_WATCHES);
    assert_eq!(db.engine().live_watches(), 1);
}
