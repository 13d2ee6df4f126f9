//! Quantified invariants, checked with `quickcheck` where the property is
//! naturally about "for any input" rather than a fixed scenario. The
//! change-set-internal properties (round trip, diff law, filter law) have
//! their own focused `quickcheck` coverage inside `settings-changeset`
//! itself; what's reasserted here is the engine-facing behavior those
//! laws feed into.

use quickcheck::{quickcheck, TestResult};
use settings_value::Value;
use settings_wire::Reply;

use fixtures::{arbitrary_key, arbitrary_value, empty_user_stack, write_db, ChangeSet, GetResult, Harness, ReadFlags};

/// 1. Read determinism: two consecutive reads of the same key, with no
/// write or source change in between, agree.
#[test]
fn prop_read_determinism() {
    fn check(seed: u8) -> TestResult {
        let mut g = quickcheck::Gen::new(seed as usize + 1);
        let h = Harness::new();
        let db = h.path("user");
        let key = arbitrary_key(&mut g);
        let value = arbitrary_value(&mut g);
        write_db(&db, |b| {
            b.insert(&key, value.clone());
        });
        let engine = h.engine(vec![fixtures::user_source(db, None)]);

        let first = engine.read(ReadFlags::NONE, &[], &key).unwrap();
        let second = engine.read(ReadFlags::NONE, &[], &key).unwrap();
        TestResult::from_bool(first == second && first == Some(value))
    }
    quickcheck(check as fn(u8) -> TestResult);
}

/// 2. Lock opacity: a key locked by a higher source is absent from
/// `list_locks` as seen from a plain read's perspective only when
/// `USER_VALUE` is requested -- i.e. `USER_VALUE` never reports the key as
/// non-writable-shadowed, it just returns the user's own stored value
/// regardless of any lock.
#[test]
fn prop_lock_opacity_to_user_value_reads() {
    fn check(seed: u8) -> TestResult {
        let mut g = quickcheck::Gen::new(seed as usize + 1);
        let h = Harness::new();
        let user_db = h.path("user");
        let site_db = h.path("site");
        let key = arbitrary_key(&mut g);
        let user_value = arbitrary_value(&mut g);
        let site_value = arbitrary_value(&mut g);
        write_db(&user_db, |b| {
            b.insert(&key, user_value.clone());
        });
        write_db(&site_db, |b| {
            b.insert(&key, site_value.clone());
            let mut locks = settings_gvdb::GvdbBuilder::new();
            locks.insert(&key, Value::Bool(true));
            b.insert_table(".locks", locks);
        });
        let engine = h.engine(vec![
            fixtures::user_source(user_db, Some(fixtures::writer_endpoint("user"))),
            fixtures::system_source("site", site_db),
        ]);

        let plain = engine.read(ReadFlags::NONE, &[], &key).unwrap();
        let as_user = engine.read(ReadFlags::USER_VALUE, &[], &key).unwrap();
        let writable = engine.is_writable(&key).unwrap();
        TestResult::from_bool(plain == Some(site_value) && as_user == Some(user_value) && !writable)
    }
    quickcheck(check as fn(u8) -> TestResult);
}

/// 6. Queue coalescing: any number of `change_fast` calls against the
/// same key while one write is in flight produce at most two `Change`
/// RPCs total, and the final read always reflects the last value
/// submitted.
#[test]
fn prop_queue_coalesces_to_at_most_two_rpcs() {
    fn check(writes: Vec<i32>) -> TestResult {
        if writes.is_empty() || writes.len() > 64 {
            return TestResult::discard();
        }
        let h = Harness::new();
        let user_db = h.path("user");
        let descriptors = empty_user_stack(&h);
        let engine = h.engine(descriptors);

        for v in &writes {
            let delta = ChangeSet::new_write("/prop/counter", Some(Value::I32(*v))).unwrap();
            engine.change_fast(delta, None).unwrap();
        }
        let after_burst_calls = h.wire.call_count("Change");
        let mut n = 0;
        while h.wire.pending_count("Change") > 0 {
            n += 1;
            h.commit_change("user", &user_db, &format!("t{}", n));
        }
        engine.sync();

        let last = *writes.last().unwrap();
        let read_back = engine.read(ReadFlags::NONE, &[], "/prop/counter").unwrap();
        TestResult::from_bool(after_burst_calls <= 2 && h.wire.call_count("Change") <= 2 && read_back == Some(Value::I32(last)))
    }
    quickcheck(check as fn(Vec<i32>) -> TestResult);
}

/// 7. Echo suppression: a `Notify` signal carrying the tag this engine's
/// own queue just recorded as `last_handled` is dropped rather than
/// re-notifying the listener a second time for the same write.
#[test]
fn prop_echo_suppression() {
    let h = Harness::new();
    let descriptors = empty_user_stack(&h);
    let engine = h.engine(descriptors);

    let delta = ChangeSet::new_write("/echo", Some(Value::I32(1))).unwrap();
    engine.change_fast(delta, None).unwrap();
    assert_eq!(h.recorder.len(), 1);

    assert!(h.wire.complete_oldest_async("Change", Ok(Reply::Str("echo-tag".to_owned()))));
    let before = h.recorder.len();

    h.wire.inject_signal(
        settings_wire::BusKind::Session,
        ":1.1",
        "/org/settingsd/Writer/user",
        "Notify",
        settings_wire::SignalBody::Notify {
            prefix: "/echo".to_owned(),
            changes: vec![String::new()],
            tag: "echo-tag".to_owned(),
        },
    );
    assert_eq!(h.recorder.len(), before, "echoed signal must not re-notify");

    h.wire.inject_signal(
        settings_wire::BusKind::Session,
        ":1.1",
        "/org/settingsd/Writer/user",
        "Notify",
        settings_wire::SignalBody::Notify {
            prefix: "/echo".to_owned(),
            changes: vec![String::new()],
            tag: "a-different-writers-tag".to_owned(),
        },
    );
    assert_eq!(h.recorder.len(), before + 1, "a genuinely different tag must notify");
}

/// 8. Subscription refcounting never goes negative and never sends more
/// than one `AddMatch`/`RemoveMatch` pair for a balanced sequence of
/// watch/unwatch calls on one path.
#[test]
fn prop_subscription_refcounting_is_balanced() {
    fn check(extra_watches: u8) -> TestResult {
        let extra = (extra_watches % 8) as usize;
        let h = Harness::new();
        let descriptors = empty_user_stack(&h);
        let engine = h.engine(descriptors);

        for _ in 0..=extra {
            engine.watch_fast("/balanced");
        }
        assert_eq!(h.wire.call_count("AddMatch"), 1);
        h.wire.complete_all_async("AddMatch", Ok(Reply::None));

        for _ in 0..=extra {
            engine.unwatch_fast("/balanced");
        }
        TestResult::from_bool(h.wire.call_count("RemoveMatch") == 1)
    }
    quickcheck(check as fn(u8) -> TestResult);
}

/// 3/4/5 (change-set round trip, database diff law, filter law): spot
/// checks at the engine-integration boundary, complementing
/// `settings-changeset`'s own property coverage of these laws in
/// isolation.
#[test]
fn prop_serialize_deserialize_round_trips_through_the_wire_form() {
    fn check(seed: u8) -> TestResult {
        let mut g = quickcheck::Gen::new(seed as usize + 1);
        let key = arbitrary_key(&mut g);
        let value = arbitrary_value(&mut g);
        let delta = ChangeSet::new_write(&key, Some(value.clone())).unwrap();
        let bytes = delta.serialize();
        let back = ChangeSet::deserialize(&bytes);
        TestResult::from_bool(matches!(back.get(&key), GetResult::Value(v) if *v == value))
    }
    quickcheck(check as fn(u8) -> TestResult);
}
