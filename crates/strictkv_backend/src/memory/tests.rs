use super::*;

fn setup() -> (InMemoryBackend, DatabaseHandle) {
    let backend = InMemoryBackend::new();
    let db = backend.open_database().unwrap();
    (backend, db)
}

fn put(backend: &InMemoryBackend, db: DatabaseHandle, key: &[u8], value: &[u8]) {
    let tr = backend.create_transaction(db).unwrap();
    backend.set(tr, key, value);
    backend.commit(tr).result().unwrap();
    backend.destroy_transaction(tr);
}

fn range(begin: KeySelector, end: KeySelector) -> RangeRequest {
    RangeRequest {
        begin,
        end,
        limit: 0,
        mode: StreamingMode::WantAll,
        iteration: 1,
        snapshot: false,
        reverse: false,
    }
}

fn keys(chunk: &RangeChunk) -> Vec<&[u8]> {
    chunk.key_values.iter().map(|kv| &kv.key[..]).collect()
}

#[test]
fn read_your_writes() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.set(tr, b"a", b"1");
    assert_eq!(
        backend.get(tr, b"a", false).result().unwrap().as_deref(),
        Some(&b"1"[..])
    );
    backend.clear(tr, b"a");
    assert_eq!(backend.get(tr, b"a", false).result().unwrap(), None);
}

#[test]
fn read_your_writes_can_be_disabled() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend
        .set_transaction_option(tr, tr_option::READ_YOUR_WRITES_DISABLE, None)
        .unwrap();
    backend.set(tr, b"a", b"1");
    assert_eq!(backend.get(tr, b"a", false).result().unwrap(), None);
}

#[test]
fn conflicting_commits_fail_with_not_committed() {
    let (backend, db) = setup();
    put(&backend, db, b"k", b"0");

    let t1 = backend.create_transaction(db).unwrap();
    let t2 = backend.create_transaction(db).unwrap();
    backend.get(t1, b"k", false).result().unwrap();
    backend.get(t2, b"k", false).result().unwrap();
    backend.set(t1, b"k", b"1");
    backend.set(t2, b"k", b"2");

    backend.commit(t1).result().unwrap();
    let err = backend.commit(t2).result().unwrap_err();
    assert_eq!(err.code(), codes::NOT_COMMITTED);
}

#[test]
fn snapshot_reads_do_not_conflict() {
    let (backend, db) = setup();
    put(&backend, db, b"k", b"0");

    let t1 = backend.create_transaction(db).unwrap();
    backend.get(t1, b"k", true).result().unwrap();
    backend.set(t1, b"other", b"x");
    put(&backend, db, b"k", b"changed");
    backend.commit(t1).result().unwrap();
}

#[test]
fn on_error_resets_retryable_and_rejects_others() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.set(tr, b"a", b"1");
    backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap();
    assert_eq!(backend.get(tr, b"a", false).result().unwrap(), None);

    let err = backend
        .on_error(tr, codes::KEY_OUTSIDE_LEGAL_RANGE)
        .result()
        .unwrap_err();
    assert_eq!(err.code(), codes::KEY_OUTSIDE_LEGAL_RANGE);
}

#[test]
fn retry_limit_is_enforced() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend
        .set_transaction_option(tr, tr_option::RETRY_LIMIT, Some(&1i64.to_le_bytes()))
        .unwrap();
    backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap();
    let err = backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap_err();
    assert_eq!(err.code(), codes::NOT_COMMITTED);
}

#[test]
fn timeout_spans_retries() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend
        .set_transaction_option(tr, tr_option::TIMEOUT, Some(&30i64.to_le_bytes()))
        .unwrap();
    backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap();
    thread::sleep(Duration::from_millis(40));

    let err = backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap_err();
    assert_eq!(err.code(), codes::TRANSACTION_TIMED_OUT);
    let err = backend.get(tr, b"k", false).result().unwrap_err();
    assert_eq!(err.code(), codes::TRANSACTION_TIMED_OUT);

    backend.reset(tr);
    backend.get(tr, b"k", false).result().unwrap();
}

#[test]
fn option_validation() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    assert_eq!(
        backend.set_transaction_option(tr, 9999, None).unwrap_err().code(),
        codes::INVALID_OPTION
    );
    assert_eq!(
        backend
            .set_transaction_option(tr, tr_option::TIMEOUT, Some(&[1, 2]))
            .unwrap_err()
            .code(),
        codes::INVALID_OPTION_VALUE
    );
    assert_eq!(
        backend.set_database_option(db, 9999, None).unwrap_err().code(),
        codes::INVALID_OPTION
    );
}

#[test]
fn deferred_errors_surface_on_commit() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.set(tr, b"\xff\x01", b"system");
    let err = backend.commit(tr).result().unwrap_err();
    assert_eq!(err.code(), codes::KEY_OUTSIDE_LEGAL_RANGE);

    let tr = backend.create_transaction(db).unwrap();
    backend.clear_range(tr, b"z", b"a");
    let err = backend.commit(tr).result().unwrap_err();
    assert_eq!(err.code(), codes::INVERTED_RANGE);
}

#[test]
fn selectors_resolve_and_clamp() {
    let (backend, db) = setup();
    for key in [&b"b"[..], b"d", b"f"] {
        put(&backend, db, key, b"");
    }
    let tr = backend.create_transaction(db).unwrap();
    let get = |sel: KeySelector| backend.get_key(tr, &sel, true).result().unwrap();

    assert_eq!(&get(KeySelector::first_greater_or_equal(b"c"))[..], b"d");
    assert_eq!(&get(KeySelector::first_greater_than(b"d"))[..], b"f");
    assert_eq!(&get(KeySelector::last_less_than(b"d"))[..], b"b");
    assert_eq!(&get(KeySelector::last_less_or_equal(b"d"))[..], b"d");
    assert_eq!(&get(KeySelector::first_greater_or_equal(b"a") + 1)[..], b"d");
    assert_eq!(&get(KeySelector::first_greater_than(b"f"))[..], b"\xff");
    assert_eq!(&get(KeySelector::last_less_than(b"b"))[..], b"");
}

#[test]
fn range_chunks_follow_streaming_mode() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    for i in 0..20u8 {
        backend.set(tr, &[b'k', i], &[i]);
    }
    backend.commit(tr).result().unwrap();

    let tr = backend.create_transaction(db).unwrap();
    let mut request = range(
        KeySelector::first_greater_or_equal(b"k"),
        KeySelector::first_greater_or_equal(b"l"),
    );
    request.mode = StreamingMode::Small;
    let chunk = backend.get_range(tr, &request).result().unwrap();
    assert_eq!(chunk.key_values.len(), 8);
    assert!(chunk.more);

    request.mode = StreamingMode::WantAll;
    request.limit = 5;
    request.reverse = true;
    let chunk = backend.get_range(tr, &request).result().unwrap();
    assert_eq!(chunk.key_values.len(), 5);
    assert_eq!(&chunk.key_values[0].key[..], &[b'k', 19]);

    request.mode = StreamingMode::Exact;
    request.limit = 0;
    let err = backend.get_range(tr, &request).result().unwrap_err();
    assert_eq!(err.code(), codes::EXACT_MODE_WITHOUT_LIMITS);
}

#[test]
fn range_clear_and_buffered_writes_merge() {
    let (backend, db) = setup();
    put(&backend, db, b"a", b"1");
    put(&backend, db, b"b", b"2");
    put(&backend, db, b"c", b"3");

    let tr = backend.create_transaction(db).unwrap();
    backend.clear_range(tr, b"a", b"c");
    backend.set(tr, b"bb", b"new");
    let request = range(
        KeySelector::first_greater_or_equal(b""),
        KeySelector::first_greater_or_equal(b"\xff"),
    );
    let chunk = backend.get_range(tr, &request).result().unwrap();
    assert_eq!(keys(&chunk), vec![&b"bb"[..], b"c"]);
    backend.commit(tr).result().unwrap();

    let tr = backend.create_transaction(db).unwrap();
    let chunk = backend.get_range(tr, &request).result().unwrap();
    assert_eq!(keys(&chunk), vec![&b"bb"[..], b"c"]);
}

#[test]
fn atomic_add_accumulates_across_commits() {
    let (backend, db) = setup();
    for _ in 0..3 {
        let tr = backend.create_transaction(db).unwrap();
        backend.atomic_op(tr, b"n", &2u64.to_le_bytes(), MutationType::Add.code());
        backend.commit(tr).result().unwrap();
    }
    let tr = backend.create_transaction(db).unwrap();
    let value = backend.get(tr, b"n", false).result().unwrap().unwrap();
    assert_eq!(&value[..], &6u64.to_le_bytes());
}

#[test]
fn versionstamped_value_uses_commit_version() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    let mut template = vec![0u8; 10];
    template.extend_from_slice(&0u32.to_le_bytes());
    backend.atomic_op(tr, b"vs", &template, MutationType::SetVersionstampedValue.code());
    backend.commit(tr).result().unwrap();
    let version = backend.get_committed_version(tr).unwrap();

    let tr = backend.create_transaction(db).unwrap();
    let value = backend.get(tr, b"vs", false).result().unwrap().unwrap();
    assert_eq!(&value[..8], &version.to_be_bytes());
}

#[test]
fn bad_versionstamp_offset_fails_the_commit() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    let mut template = vec![0u8; 4];
    template.extend_from_slice(&2u32.to_le_bytes());
    backend.atomic_op(tr, b"vs", &template, MutationType::SetVersionstampedValue.code());
    backend.set(tr, b"other", b"x");
    let err = backend.commit(tr).result().unwrap_err();
    assert_eq!(err.code(), codes::CLIENT_INVALID_OPERATION);

    let tr = backend.create_transaction(db).unwrap();
    backend.atomic_op(tr, b"short", &template, MutationType::SetVersionstampedKey.code());
    let err = backend.commit(tr).result().unwrap_err();
    assert_eq!(err.code(), codes::CLIENT_INVALID_OPERATION);

    let tr = backend.create_transaction(db).unwrap();
    assert_eq!(backend.get(tr, b"other", false).result().unwrap(), None);
}

#[test]
fn read_only_commit_has_no_version() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.get(tr, b"a", false).result().unwrap();
    backend.commit(tr).result().unwrap();
    assert_eq!(backend.get_committed_version(tr).unwrap(), -1);
}

#[test]
fn watch_fires_on_later_change() {
    let (backend, db) = setup();
    put(&backend, db, b"w", b"0");

    let tr = backend.create_transaction(db).unwrap();
    let watch = backend.watch(tr, b"w");
    backend.commit(tr).result().unwrap();
    backend.destroy_transaction(tr);
    assert!(!watch.is_ready());

    put(&backend, db, b"w", b"0");
    assert!(!watch.is_ready());
    put(&backend, db, b"w", b"1");
    assert_eq!(watch.result(), Ok(()));
}

#[test]
fn watch_fails_with_commit_error_or_cancellation() {
    let (backend, db) = setup();
    put(&backend, db, b"w", b"0");

    let tr = backend.create_transaction(db).unwrap();
    backend.get(tr, b"w", false).result().unwrap();
    backend.set(tr, b"w", b"mine");
    let watch = backend.watch(tr, b"w");
    put(&backend, db, b"w", b"theirs");
    backend.commit(tr).result().unwrap_err();
    assert_eq!(watch.result().unwrap_err().code(), codes::NOT_COMMITTED);

    let tr = backend.create_transaction(db).unwrap();
    let watch = backend.watch(tr, b"w");
    backend.destroy_transaction(tr);
    assert_eq!(
        watch.result().unwrap_err().code(),
        codes::TRANSACTION_CANCELLED
    );
}

#[test]
fn max_watches_is_enforced() {
    let (backend, db) = setup();
    backend
        .set_database_option(db, db_option::MAX_WATCHES, Some(&1i64.to_le_bytes()))
        .unwrap();
    let tr = backend.create_transaction(db).unwrap();
    let first = backend.watch(tr, b"a");
    let second = backend.watch(tr, b"b");
    assert!(!first.is_ready());
    assert_eq!(second.result().unwrap_err().code(), codes::TOO_MANY_WATCHES);
}

#[test]
fn cancel_poisons_the_handle() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.cancel(tr);
    assert_eq!(
        backend.get(tr, b"a", false).result().unwrap_err().code(),
        codes::TRANSACTION_CANCELLED
    );
    assert_eq!(
        backend.commit(tr).result().unwrap_err().code(),
        codes::TRANSACTION_CANCELLED
    );
    backend.reset(tr);
    backend.get(tr, b"a", false).result().unwrap();
}

#[test]
fn destroyed_handles_are_rejected() {
    let (backend, db) = setup();
    let tr = backend.create_transaction(db).unwrap();
    backend.destroy_transaction(tr);
    backend.destroy_transaction(tr);
    assert_eq!(
        backend.get(tr, b"a", false).result().unwrap_err().code(),
        codes::CLIENT_INVALID_OPERATION
    );
    backend.destroy_database(db);
    assert_eq!(
        backend.create_transaction(db).unwrap_err().code(),
        codes::CLIENT_INVALID_OPERATION
    );
}

#[test]
fn threaded_delivery_settles_later() {
    let backend = InMemoryBackend::with_delivery(Delivery::Threaded(Duration::from_millis(5)));
    let db = backend.open_database().unwrap();
    let tr = backend.create_transaction(db).unwrap();
    backend.set(tr, b"a", b"1");
    backend.commit(tr).result().unwrap();

    let tr = backend.create_transaction(db).unwrap();
    let pending = backend.get(tr, b"a", false);
    backend.reset(tr);
    assert_eq!(
        pending.result().unwrap_err().code(),
        codes::TRANSACTION_CANCELLED
    );
}

#[test]
fn history_is_pruned_past_active_readers() {
    let (backend, db) = setup();
    let reader = backend.create_transaction(db).unwrap();
    put(&backend, db, b"k", b"0");
    let pinned = backend.get_read_version(reader).result().unwrap();

    for i in 1..=50u8 {
        put(&backend, db, b"k", &[i]);
    }
    let value = backend.get(reader, b"k", false).result().unwrap();
    assert_eq!(value.as_deref(), Some(&b"0"[..]));
    {
        let engine = backend.engine.lock();
        assert_eq!(engine.store.horizon(), pinned);
        assert_eq!(engine.store.retained_versions(), 51);
        assert_eq!(engine.store.logged_commits(), 50);
    }

    backend.destroy_transaction(reader);
    put(&backend, db, b"k", b"last");
    let engine = backend.engine.lock();
    assert_eq!(engine.store.horizon(), engine.store.committed_version());
    assert_eq!(engine.store.retained_versions(), 1);
    assert_eq!(engine.store.logged_commits(), 0);
}

#[test]
fn reads_below_the_horizon_are_too_old() {
    let (backend, db) = setup();
    put(&backend, db, b"k", b"0");
    let old = backend.committed_version();
    put(&backend, db, b"k", b"1");

    let tr = backend.create_transaction(db).unwrap();
    backend.set_read_version(tr, old);
    let err = backend.get(tr, b"k", false).result().unwrap_err();
    assert_eq!(err.code(), codes::TRANSACTION_TOO_OLD);
    backend.on_error(tr, err.code()).result().unwrap();
    assert_eq!(
        backend.get(tr, b"k", false).result().unwrap().as_deref(),
        Some(&b"1"[..])
    );
}
