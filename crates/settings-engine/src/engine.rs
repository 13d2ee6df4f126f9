//! The composed read view over a stack of sources (§4.7.1-§4.7.5), plus the
//! shared state the write path (`crate::write`) and watch path
//! (`crate::watch`) build on.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use settings_changeset::{ChangeSet, GetResult};
use settings_source::{PathConfig, SourceDescriptor, SourceState};
use settings_value::Value;
use settings_wire::{Endpoint, WireAdapter};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::notify::{ChangeListener, ChangeNotification};
use crate::registry;
use crate::watch::SubsInner;

/// Read qualifiers for [`Engine::read`] (§4.7.3). `USER_VALUE` and
/// `DEFAULT_VALUE` are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFlags(u32);

impl ReadFlags {
    pub const NONE: ReadFlags = ReadFlags(0);
    /// The user's own value (read-through/queue/source-0), ignoring locks
    /// and never falling through to higher sources.
    pub const USER_VALUE: ReadFlags = ReadFlags(1 << 0);
    /// What would be read if the user reset the key: source 0 is skipped
    /// entirely, including its read-through and queued writes.
    pub const DEFAULT_VALUE: ReadFlags = ReadFlags(1 << 1);

    fn has(self, flag: ReadFlags) -> bool {
        self.0 & flag.0 != 0
    }
}

impl Default for ReadFlags {
    fn default() -> ReadFlags {
        ReadFlags::NONE
    }
}

impl std::ops::BitOr for ReadFlags {
    type Output = ReadFlags;
    fn bitor(self, rhs: ReadFlags) -> ReadFlags {
        ReadFlags(self.0 | rhs.0)
    }
}

pub(crate) struct SourcesDynamic {
    pub(crate) states: Vec<SourceState>,
    pub(crate) state_counter: u64,
}

#[derive(Default)]
pub(crate) struct QueueInner {
    pub(crate) pending: Option<ChangeSet>,
    pub(crate) in_flight: Option<ChangeSet>,
    pub(crate) last_handled: Option<String>,
}

/// The client-side engine: a composed read view over an ordered stack of
/// sources (index 0 is the user's own, writable source; later indices
/// shadow it when locked), a two-stage optimistic write queue, and
/// subscription bookkeeping. Always held behind an `Arc`, since the write
/// and watch paths keep it alive across async wire callbacks.
pub struct Engine {
    pub(crate) descriptors: Vec<SourceDescriptor>,
    pub(crate) sources: Mutex<SourcesDynamic>,
    pub(crate) queue: Mutex<QueueInner>,
    pub(crate) queue_cond: Condvar,
    pub(crate) subs: Mutex<SubsInner>,
    pub(crate) wire: Arc<dyn WireAdapter>,
    pub(crate) shm_base: PathBuf,
    pub(crate) use_mmap: bool,
    pub(crate) listener: Weak<dyn ChangeListener + Send + Sync>,
}

impl Engine {
    /// Resolve `config`'s profile (the default chain if unset) into a
    /// source stack, and construct an engine wired to `wire` for RPCs and
    /// signals, delivering change notifications to `listener` for as long
    /// as it stays alive.
    pub fn new(
        config: EngineConfig,
        wire: Arc<dyn WireAdapter>,
        listener: Weak<dyn ChangeListener + Send + Sync>,
    ) -> Arc<Engine> {
        let paths = PathConfig::from_env();
        let shm_base = config.runtime_dir.clone().unwrap_or_else(settings_shm::default_base_dir);
        let descriptors = settings_source::resolve_profile(config.profile.as_deref(), &config.uid, &paths);
        let states = descriptors.iter().map(|_| SourceState::new()).collect();

        let engine = Arc::new(Engine {
            descriptors,
            sources: Mutex::new(SourcesDynamic { states, state_counter: 0 }),
            queue: Mutex::new(QueueInner::default()),
            queue_cond: Condvar::new(),
            subs: Mutex::new(SubsInner::default()),
            wire: Arc::clone(&wire),
            shm_base,
            use_mmap: config.use_mmap,
            listener,
        });

        wire.set_signal_sink(registry::global_sink());
        registry::register(&engine);
        engine
    }

    /// Lock ordering: sources, then queue, then subscription counts
    /// (§4.7.2). Every call site in this crate that needs more than one
    /// of these three locks acquires them in that order and never holds
    /// two at once across a call into another acquirer.
    pub(crate) fn acquire_sources(&self) -> MutexGuard<'_, SourcesDynamic> {
        let mut dynamic = self.sources.lock().unwrap();
        for (desc, state) in self.descriptors.iter().zip(dynamic.states.iter_mut()) {
            if state.refresh(desc, &self.shm_base, &*self.wire, self.use_mmap) {
                dynamic.state_counter = dynamic.state_counter.wrapping_add(1);
            }
        }
        dynamic
    }

    pub(crate) fn current_state(&self) -> u64 {
        self.acquire_sources().state_counter
    }

    pub(crate) fn source0_endpoint(&self) -> Option<Endpoint> {
        self.descriptors.first().and_then(|d| d.endpoint.clone())
    }

    pub(crate) fn notify_listener(&self, notification: ChangeNotification) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_change(&notification);
        }
    }

    /// Read `key` through the composed stack (§4.7.3).
    ///
    /// `read_through` lets a caller layer its own in-flight change sets
    /// (e.g. a binding not yet submitted) ahead of the engine's own
    /// pending/in-flight queues; it is consulted tail-to-head (most
    /// recently supplied set wins) and ignored entirely under
    /// `DEFAULT_VALUE`. Pass `&[]` if the caller has none.
    pub fn read(&self, flags: ReadFlags, read_through: &[&ChangeSet], key: &str) -> Result<Option<Value>> {
        settings_path::check_key(key)?;
        debug_assert!(
            !(flags.has(ReadFlags::USER_VALUE) && flags.has(ReadFlags::DEFAULT_VALUE)),
            "USER_VALUE and DEFAULT_VALUE are mutually exclusive"
        );
        let user_value = flags.has(ReadFlags::USER_VALUE);
        let default_value = flags.has(ReadFlags::DEFAULT_VALUE);

        let dynamic = self.acquire_sources();
        let n = self.descriptors.len();

        // Step 1: the highest-indexed source (other than 0) that locks
        // `key`, if any. Locks are opaque to USER_VALUE reads.
        let mut lock_level = 0usize;
        if !user_value {
            for i in (1..n).rev() {
                if dynamic.states[i].locks().map(|l| l.has_value(key)).unwrap_or(false) {
                    lock_level = i;
                    break;
                }
            }
        }

        // Step 2: source 0's own contribution, unless it's locked out.
        let mut consumed = 0usize;
        let mut user_layer_value: Option<Value> = None;

        if lock_level == 0 && n > 0 && self.descriptors[0].writable {
            consumed = 1;
            if !default_value {
                let tri = first_entry(key, read_through.iter().rev().copied()).or_else(|| {
                    let q = self.queue.lock().unwrap();
                    first_entry(key, q.pending.iter()).or_else(|| first_entry(key, q.in_flight.iter()))
                });
                match tri {
                    Some(v) => user_layer_value = v,
                    None => user_layer_value = dynamic.states[0].values().and_then(|g| g.get_value(key)),
                }
            }
        }

        if user_value {
            return Ok(user_layer_value);
        }
        if user_layer_value.is_some() {
            return Ok(user_layer_value);
        }

        // Step 3: source 0 contributed nothing (absent, reset, or
        // skipped for DEFAULT_VALUE/a lock) -- walk the remaining sources
        // for the first present value.
        let start = lock_level.max(consumed);
        for i in start..n {
            if let Some(v) = dynamic.states[i].values().and_then(|g| g.get_value(key)) {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// The set-union of immediate children of `dir` across every source's
    /// database (§4.7.4). Pending/in-flight writes are not consulted --
    /// `list` describes what is durably on disk.
    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        settings_path::check_dir(dir)?;
        let dynamic = self.acquire_sources();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for state in &dynamic.states {
            if let Some(gvdb) = state.values() {
                for child in gvdb.list(dir) {
                    if seen.insert(child.clone()) {
                        out.push(child);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Whether `key` could currently be written (§4.7.5): source 0 must
    /// exist and be writable, and no higher source may lock the key.
    pub fn is_writable(&self, key: &str) -> Result<bool> {
        settings_path::check_key(key)?;
        let dynamic = self.acquire_sources();
        Ok(self.is_writable_locked(&dynamic, key))
    }

    pub(crate) fn is_writable_locked(&self, dynamic: &SourcesDynamic, key: &str) -> bool {
        let n = self.descriptors.len();
        if n == 0 || !self.descriptors[0].writable {
            return false;
        }
        for i in 1..n {
            if dynamic.states[i].locks().map(|l| l.has_value(key)).unwrap_or(false) {
                return false;
            }
        }
        true
    }

    /// Every lock shadowing `path` (§4.7.5). For a dir, the locked keys
    /// under it in every source above index 0 -- or, if there is no
    /// writable source 0 at all, the dir itself as a single synthetic
    /// "everything here is locked" entry. For a key, just that key if it
    /// is not writable, else an empty list.
    pub fn list_locks(&self, path: &str) -> Result<Vec<String>> {
        if settings_path::is_dir(path) {
            let dynamic = self.acquire_sources();
            let n = self.descriptors.len();
            if n == 0 || !self.descriptors[0].writable {
                return Ok(vec![path.to_owned()]);
            }
            let mut out = Vec::new();
            for i in 1..n {
                if let Some(locks) = dynamic.states[i].locks() {
                    for key in locks.get_names() {
                        if key.starts_with(path) {
                            out.push(key);
                        }
                    }
                }
            }
            Ok(out)
        } else if settings_path::is_key(path) {
            if self.is_writable(path)? {
                Ok(Vec::new())
            } else {
                Ok(vec![path.to_owned()])
            }
        } else {
            Err(Error::from(settings_path::check_key(path).unwrap_err()))
        }
    }

    /// Block until no write is in flight (§4.7.10).
    pub fn sync(&self) {
        let mut q = self.queue.lock().unwrap();
        while q.in_flight.is_some() {
            q = self.queue_cond.wait(q).unwrap();
        }
    }

    /// Build an engine directly from an already-assembled source stack,
    /// bypassing profile resolution entirely. [`Engine::new`] is the
    /// entry point for a real client; this is for callers (tests, or a
    /// harness replaying a captured source stack) that already know
    /// exactly which sources they want rather than resolving a profile.
    pub fn with_sources(
        descriptors: Vec<SourceDescriptor>,
        wire: Arc<dyn WireAdapter>,
        listener: Weak<dyn ChangeListener + Send + Sync>,
        shm_base: PathBuf,
    ) -> Arc<Engine> {
        let states = descriptors.iter().map(|_| SourceState::new()).collect();
        let engine = Arc::new(Engine {
            descriptors,
            sources: Mutex::new(SourcesDynamic { states, state_counter: 0 }),
            queue: Mutex::new(QueueInner::default()),
            queue_cond: Condvar::new(),
            subs: Mutex::new(SubsInner::default()),
            wire: Arc::clone(&wire),
            shm_base,
            use_mmap: true,
            listener,
        });
        wire.set_signal_sink(registry::global_sink());
        registry::register(&engine);
        engine
    }
}

fn first_entry<'a>(key: &str, sets: impl Iterator<Item = &'a ChangeSet>) -> Option<Option<Value>> {
    for cs in sets {
        match cs.get(key) {
            GetResult::Absent => continue,
            GetResult::Reset => return Some(None),
            GetResult::Value(v) => return Some(Some(v.clone())),
        }
    }
    None
}
