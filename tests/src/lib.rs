//! Shared fixtures for the end-to-end scenario and property tests under
//! `tests/`: a `MockAdapter`-backed engine builder and a notification
//! recorder, reused across every integration test binary in this crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use quickcheck::Arbitrary;
use settings_gvdb::GvdbBuilder;
use settings_source::{Kind, SourceDescriptor};
use settings_value::Value;
use settings_wire::mock::MockAdapter;
use settings_wire::{Args, BusKind, Endpoint, Reply};

pub use settings_changeset::{ChangeSet, GetResult};
pub use settings_engine::{ChangeListener, ChangeNotification, Engine, EngineConfig, ReadFlags};

/// A [`ChangeListener`] that just records every notification it receives,
/// in order, behind a mutex so tests can assert on them from the main
/// thread after driving the mock adapter.
#[derive(Default)]
pub struct Recorder {
    pub notifications: Mutex<Vec<ChangeNotification>>,
}

impl ChangeListener for Recorder {
    fn on_change(&self, notification: &ChangeNotification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}

impl Recorder {
    pub fn len(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn last(&self) -> ChangeNotification {
        self.notifications.lock().unwrap().last().cloned().expect("no notification recorded yet")
    }
}

/// Write a GVDB fixture file at `path`, built by `f`.
pub fn write_db(path: &Path, f: impl FnOnce(&mut GvdbBuilder)) {
    let mut b = GvdbBuilder::new();
    f(&mut b);
    std::fs::write(path, b.build()).unwrap();
}

pub fn writer_endpoint(name: &str) -> Endpoint {
    Endpoint::new(BusKind::Session, "org.settingsd.Writer", format!("/org/settingsd/Writer/{}", name))
}

pub fn user_source(db_path: PathBuf, endpoint: Option<Endpoint>) -> SourceDescriptor {
    SourceDescriptor { kind: Kind::User, name: "user".to_owned(), writable: true, db_path, endpoint }
}

pub fn system_source(name: &str, db_path: PathBuf) -> SourceDescriptor {
    SourceDescriptor { kind: Kind::System, name: name.to_owned(), writable: false, db_path, endpoint: None }
}

/// A self-contained fixture: a temp dir holding every source's GVDB file
/// and the shm flag directory, plus the mock wire adapter and recorder the
/// engine under test is wired to.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub wire: Arc<MockAdapter>,
    pub recorder: Arc<Recorder>,
    /// Database-mode snapshot of each named source's content as committed
    /// so far, kept so `commit_change` can fold a new delta in and rewrite
    /// the whole fixture file (a GVDB file has no incremental writer).
    committed: Mutex<HashMap<String, ChangeSet>>,
}

impl Harness {
    pub fn new() -> Harness {
        Harness {
            dir: tempfile::tempdir().unwrap(),
            wire: MockAdapter::new(),
            recorder: Arc::new(Recorder::default()),
            committed: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn shm_base(&self) -> PathBuf {
        self.dir.path().join("shm")
    }

    pub fn listener(&self) -> Weak<dyn ChangeListener + Send + Sync> {
        Arc::downgrade(&self.recorder) as Weak<dyn ChangeListener + Send + Sync>
    }

    /// Build an engine from an explicit source stack (bypassing profile
    /// resolution) wired to this harness's mock adapter and recorder.
    pub fn engine(&self, descriptors: Vec<SourceDescriptor>) -> Arc<Engine> {
        Engine::with_sources(descriptors, self.wire.clone(), self.listener(), self.shm_base())
    }

    /// Complete the oldest pending `Change` call with a successful reply
    /// tagged `tag`, playing the writer's own part: fold the committed
    /// delta into `name`'s tracked content, rewrite `db_path`'s GVDB
    /// fixture from it, and flag shm so the next `acquire_sources` reopens
    /// and observes the new value. Panics if no `Change` call is pending.
    pub fn commit_change(&self, name: &str, db_path: &Path, tag: &str) {
        let args = self.wire.peek_oldest_pending_args("Change").expect("no pending Change call to commit");
        assert!(self.wire.complete_oldest_async("Change", Ok(Reply::Str(tag.to_owned()))));

        let bytes = match args {
            Args::Bytes(b) => b,
            _ => Vec::new(),
        };
        let delta = ChangeSet::deserialize(&bytes);

        let mut committed = self.committed.lock().unwrap();
        let current = committed.entry(name.to_owned()).or_insert_with(|| ChangeSet::new_database(None));
        current.apply(&delta);

        write_db(db_path, |b| {
            current.all(|path, value| {
                if let Some(v) = value {
                    b.insert(path, v.clone());
                }
                true
            });
        });
        settings_shm::flag(&self.shm_base(), name).expect("flagging the shm cell for a committed source");
    }
}

/// A single-source stack: one empty, writable user database.
pub fn empty_user_stack(harness: &Harness) -> Vec<SourceDescriptor> {
    let db = harness.path("user");
    write_db(&db, |_| {});
    vec![user_source(db, Some(writer_endpoint("user")))]
}

/// Random absolute key paths and values for property tests: two to four
/// segments of lowercase ASCII words, and one of a handful of [`Value`]
/// shapes.
pub fn arbitrary_key(g: &mut quickcheck::Gen) -> String {
    let segments = 1 + (usize::arbitrary(g) % 3);
    let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let mut path = String::new();
    for _ in 0..segments {
        path.push('/');
        path.push_str(words[usize::arbitrary(g) % words.len()]);
    }
    path
}

pub fn arbitrary_value(g: &mut quickcheck::Gen) -> Value {
    match usize::arbitrary(g) % 3 {
        0 => Value::I32(i32::arbitrary(g)),
        1 => Value::Bool(bool::arbitrary(g)),
        _ => Value::Str(format!("v{}", u32::arbitrary(g))),
    }
}
