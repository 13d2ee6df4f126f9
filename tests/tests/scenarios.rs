//! End-to-end scenarios against a real (if mocked) wire transport and real
//! GVDB fixtures: S1-S6, exercising the engine's public surface the way a
//! client library would, rather than its crate-internal unit tests.

use settings_gvdb::GvdbBuilder;
use settings_value::Value;
use settings_wire::{Reply, WireError};

use fixtures::{empty_user_stack, system_source, user_source, write_db, writer_endpoint, ChangeSet, Harness, ReadFlags};

/// S1: a locked key in a higher source shadows the user's own value under
/// a plain read, is bypassed by `USER_VALUE`, makes the key non-writable,
/// and shows up under `list_locks`.
#[test]
fn s1_layered_read_with_lock() {
    let h = Harness::new();
    let user_path = h.path("user");
    let site_path = h.path("site");
    write_db(&user_path, |b| {
        b.insert("/net/proxy", Value::Str("direct".to_owned()));
    });
    write_db(&site_path, |b| {
        b.insert("/net/proxy", Value::Str("corp-proxy".to_owned()));
        let mut locks = GvdbBuilder::new();
        locks.insert("/net/proxy", Value::Bool(true));
        b.insert_table(".locks", locks);
    });

    let engine = h.engine(vec![
        user_source(user_path, Some(writer_endpoint("user"))),
        system_source("site", site_path),
    ]);

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/net/proxy").unwrap(), Some(Value::Str("corp-proxy".to_owned())));
    assert_eq!(engine.read(ReadFlags::USER_VALUE, &[], "/net/proxy").unwrap(), Some(Value::Str("direct".to_owned())));
    assert!(!engine.is_writable("/net/proxy").unwrap());
    assert_eq!(engine.list_locks("/net/").unwrap(), vec!["/net/proxy".to_owned()]);
}

/// S2: an optimistic write is visible immediately to this process's own
/// read, and is rolled back -- both the read value and a second
/// notification -- once the writer reports failure.
#[test]
fn s2_optimistic_write_and_rollback() {
    let h = Harness::new();
    let descriptors = empty_user_stack(&h);
    let engine = h.engine(descriptors);

    let delta = ChangeSet::new_write("/ui/theme", Some(Value::Str("dark".to_owned()))).unwrap();
    engine.change_fast(delta, None).unwrap();

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/ui/theme").unwrap(), Some(Value::Str("dark".to_owned())));
    assert_eq!(h.recorder.len(), 1);

    assert!(h.wire.complete_oldest_async("Change", Err(WireError::Failed("writer crashed".to_owned()))));

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/ui/theme").unwrap(), None);
    assert_eq!(h.recorder.len(), 2);
    assert_eq!(h.recorder.last().prefix, "/ui/theme");
}

/// S3: a burst of writes against the same key while one is already in
/// flight coalesce into a single follow-up RPC, and reads always reflect
/// the most recently queued value regardless of which queue it lives in.
#[test]
fn s3_coalescing_writes() {
    let h = Harness::new();
    let user_db = h.path("user");
    let descriptors = empty_user_stack(&h);
    let engine = h.engine(descriptors);

    for i in 0..50 {
        let delta = ChangeSet::new_write("/counter", Some(Value::I32(i))).unwrap();
        engine.change_fast(delta, None).unwrap();
    }
    assert_eq!(h.wire.call_count("Change"), 1);
    assert_eq!(engine.read(ReadFlags::NONE, &[], "/counter").unwrap(), Some(Value::I32(49)));

    h.commit_change("user", &user_db, "tag-a");
    assert_eq!(h.wire.call_count("Change"), 2);
    h.commit_change("user", &user_db, "tag-b");

    engine.sync();
    assert_eq!(h.wire.call_count("Change"), 2);
    assert_eq!(engine.read(ReadFlags::NONE, &[], "/counter").unwrap(), Some(Value::I32(49)));
}

/// S4: a value change that lands between `watch_fast`'s `AddMatch` call
/// and its ack is not silently dropped -- the state counter comparison
/// catches it and a catch-up notification follows the ack.
#[test]
fn s4_watch_establishment_race() {
    let h = Harness::new();
    let user_path = h.path("user");
    write_db(&user_path, |b| {
        b.insert("/net/hostname", Value::Str("localhost".to_owned()));
    });
    let engine = h.engine(vec![user_source(user_path, Some(writer_endpoint("user")))]);

    engine.watch_fast("/net/hostname");
    assert_eq!(h.wire.call_count("AddMatch"), 1);
    assert_eq!(h.recorder.len(), 0);

    settings_shm::flag(&h.shm_base(), "user").unwrap();

    assert!(h.wire.complete_oldest_async("AddMatch", Ok(Reply::None)));
    assert_eq!(h.recorder.len(), 1);
    assert_eq!(h.recorder.last().prefix, "/net/hostname");
}

/// S5: N overlapping `watch_fast` subscriptions for one path collapse to
/// one `AddMatch`, and `RemoveMatch` fires only once the last matching
/// `unwatch_fast` drops the count to zero.
#[test]
fn s5_subscription_counting() {
    let h = Harness::new();
    let descriptors = empty_user_stack(&h);
    let engine = h.engine(descriptors);

    engine.watch_fast("/a");
    engine.watch_fast("/a");
    engine.watch_fast("/a");
    assert_eq!(h.wire.call_count("AddMatch"), 1);
    assert!(h.wire.complete_oldest_async("AddMatch", Ok(Reply::None)));

    engine.unwatch_fast("/a");
    assert_eq!(h.wire.call_count("RemoveMatch"), 0);
    engine.unwatch_fast("/a");
    assert_eq!(h.wire.call_count("RemoveMatch"), 0);
    engine.unwatch_fast("/a");
    assert_eq!(h.wire.call_count("RemoveMatch"), 1);
}

/// S6: diffing two database snapshots produces the minimal delta that
/// reproduces the second from the first, including resets for keys that
/// vanished.
#[test]
fn s6_database_diff() {
    let mut from = ChangeSet::new_database(None);
    from.set("/a", Some(Value::I32(1))).unwrap();
    from.set("/b", Some(Value::I32(2))).unwrap();

    let mut to = ChangeSet::new_database(None);
    to.set("/a", Some(Value::I32(1))).unwrap();
    to.set("/c", Some(Value::I32(3))).unwrap();

    let delta = ChangeSet::diff(&from, &to).unwrap().expect("snapshots differ");
    assert_eq!(delta.get_value("/b"), None);
    assert!(matches!(delta.get("/b"), fixtures::GetResult::Reset));
    assert_eq!(delta.get_value("/c"), Some(&Value::I32(3)));
    assert!(matches!(delta.get("/a"), fixtures::GetResult::Absent));

    let mut replayed = from.clone();
    replayed.apply(&delta);
    assert_eq!(replayed.to_map(), to.to_map());
}
