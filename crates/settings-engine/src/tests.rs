//! Scenario-style tests for the engine's read/write/watch paths, built
//! directly against [`settings_wire::mock::MockAdapter`] and GVDB fixtures
//! instead of a real bus -- the same harness the top-level integration
//! suite uses, at crate-local scope.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use settings_changeset::ChangeSet;
use settings_gvdb::GvdbBuilder;
use settings_source::{Kind, SourceDescriptor};
use settings_value::Value;
use settings_wire::mock::MockAdapter;
use settings_wire::{BusKind, Endpoint, Reply, WireError};

use crate::{ChangeListener, ChangeNotification, Engine, ReadFlags};

#[derive(Default)]
struct Recorder {
    notifications: Mutex<Vec<ChangeNotification>>,
}

impl ChangeListener for Recorder {
    fn on_change(&self, notification: &ChangeNotification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

fn write_db(path: &std::path::Path, f: impl FnOnce(&mut GvdbBuilder)) {
    let mut b = GvdbBuilder::new();
    f(&mut b);
    std::fs::write(path, b.build()).unwrap();
}

fn user_descriptor(db_path: PathBuf, endpoint: Option<Endpoint>) -> SourceDescriptor {
    SourceDescriptor { kind: Kind::User, name: "user".to_owned(), writable: true, db_path, endpoint }
}

fn site_descriptor(db_path: PathBuf) -> SourceDescriptor {
    SourceDescriptor { kind: Kind::System, name: "site".to_owned(), writable: false, db_path, endpoint: None }
}

fn writer_endpoint(name: &str) -> Endpoint {
    Endpoint::new(BusKind::Session, "org.settingsd.Writer", format!("/org/settingsd/Writer/{}", name))
}

/// §8 S1: a locked key in a higher source shadows the user's own value,
/// and that same lock makes the key non-writable and shows up under
/// `list_locks`.
#[test]
fn lock_in_higher_source_shadows_user_value() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    let site_path = dir.path().join("site");
    write_db(&user_path, |b| {
        b.insert("/a", Value::I32(99));
    });
    write_db(&site_path, |b| {
        b.insert("/a", Value::I32(7));
        let mut locks = GvdbBuilder::new();
        locks.insert("/a", Value::Bool(true));
        b.insert_table(".locks", locks);
    });

    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user"))), site_descriptor(site_path)],
        wire,
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/a").unwrap(), Some(Value::I32(7)));
    assert_eq!(engine.read(ReadFlags::USER_VALUE, &[], "/a").unwrap(), Some(Value::I32(99)));
    assert!(!engine.is_writable("/a").unwrap());
    assert_eq!(engine.list_locks("/").unwrap(), vec!["/a".to_owned()]);
}

/// §8 S2: an optimistic write is visible immediately, and rolls back (a
/// second notification, and the read value reverting) once the writer
/// reports failure.
#[test]
fn change_fast_rolls_back_on_writer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    write_db(&user_path, |_| {});

    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user")))],
        wire.clone(),
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );

    let delta = ChangeSet::new_write("/x", Some(Value::Str("hi".to_owned()))).unwrap();
    engine.change_fast(delta, None).unwrap();

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/x").unwrap(), Some(Value::Str("hi".to_owned())));
    assert_eq!(recorder.notifications.lock().unwrap().len(), 1);

    assert!(wire.complete_oldest_async("Change", Err(WireError::Failed("disk full".to_owned()))));

    assert_eq!(engine.read(ReadFlags::NONE, &[], "/x").unwrap(), None);
    assert_eq!(recorder.notifications.lock().unwrap().len(), 2);
}

/// §8 S3: successive `change_fast` calls against the same key coalesce
/// into the pending change set while a write is in flight, so a burst
/// produces at most two `Change` RPCs: the first sent immediately, and a
/// second carrying everything coalesced while it was outstanding.
#[test]
fn change_fast_coalesces_while_a_write_is_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    write_db(&user_path, |_| {});

    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user")))],
        wire.clone(),
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );

    for i in 0..100 {
        let delta = ChangeSet::new_write("/v", Some(Value::I32(i))).unwrap();
        engine.change_fast(delta, None).unwrap();
    }
    assert_eq!(wire.call_count("Change"), 1);
    assert_eq!(engine.read(ReadFlags::NONE, &[], "/v").unwrap(), Some(Value::I32(99)));

    assert!(wire.complete_oldest_async("Change", Ok(Reply::Str("tag-1".to_owned()))));
    assert_eq!(wire.call_count("Change"), 2);

    assert!(wire.complete_oldest_async("Change", Ok(Reply::Str("tag-2".to_owned()))));
    engine.sync();
    assert_eq!(wire.call_count("Change"), 2);
}

/// §8 S4: a value change observed between `watch_fast`'s `AddMatch` and
/// its ack is not silently missed -- the engine compares state before and
/// after the ack and synthesizes a catch-up notification.
#[test]
fn watch_fast_recovers_a_change_missed_during_establishment() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    write_db(&user_path, |b| {
        b.insert("/a/b/c", Value::I32(1));
    });
    let shm_base = dir.path().join("shm");

    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path.clone(), Some(writer_endpoint("user")))],
        wire.clone(),
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        shm_base.clone(),
    );

    engine.watch_fast("/a/b/c");
    assert_eq!(wire.call_count("AddMatch"), 1);
    assert!(recorder.notifications.lock().unwrap().is_empty());

    settings_shm::flag(&shm_base, "user").unwrap();

    assert!(wire.complete_oldest_async("AddMatch", Ok(Reply::None)));
    assert_eq!(recorder.notifications.lock().unwrap().len(), 1);
    assert_eq!(recorder.notifications.lock().unwrap()[0].prefix, "/a/b/c");
}

/// §8 S5: subscription reference counting collapses N `watch_fast` calls
/// for the same path into a single `AddMatch`, and only the last matching
/// `unwatch_fast` sends `RemoveMatch`.
#[test]
fn watch_fast_reference_counts_per_path() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    write_db(&user_path, |_| {});
    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user")))],
        wire.clone(),
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );

    engine.watch_fast("/p");
    engine.watch_fast("/p");
    engine.watch_fast("/p");
    assert_eq!(wire.call_count("AddMatch"), 1);
    assert!(wire.complete_oldest_async("AddMatch", Ok(Reply::None)));

    engine.unwatch_fast("/p");
    engine.unwatch_fast("/p");
    assert_eq!(wire.call_count("RemoveMatch"), 0);
    engine.unwatch_fast("/p");
    assert_eq!(wire.call_count("RemoveMatch"), 1);
}

#[test]
#[should_panic(expected = "no outstanding subscription")]
fn unwatch_fast_without_a_subscription_panics() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    write_db(&user_path, |_| {});
    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user")))],
        wire,
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );
    engine.unwatch_fast("/never-watched");
}

/// A direct `Change` RPC failure surfaced through `change_sync` leaves the
/// engine's own queue untouched -- there is no queue interaction on the
/// synchronous path.
#[test]
fn change_sync_rejects_writes_to_locked_keys() {
    let dir = tempfile::tempdir().unwrap();
    let user_path = dir.path().join("user");
    let site_path = dir.path().join("site");
    write_db(&user_path, |_| {});
    write_db(&site_path, |b| {
        let mut locks = GvdbBuilder::new();
        locks.insert("/a", Value::Bool(true));
        b.insert_table(".locks", locks);
    });

    let wire = MockAdapter::new();
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::with_sources(
        vec![user_descriptor(user_path, Some(writer_endpoint("user"))), site_descriptor(site_path)],
        wire.clone(),
        Arc::downgrade(&recorder) as Weak<dyn ChangeListener + Send + Sync>,
        dir.path().join("shm"),
    );

    let delta = ChangeSet::new_write("/a", Some(Value::I32(1))).unwrap();
    let err = engine.change_sync(delta).unwrap_err();
    assert_eq!(err, crate::Error::NotWritable);
    assert_eq!(wire.call_count("Change"), 0);
}
