//! Change sets: an ordered `path -> Option<value>` mapping, the unit of
//! submission to the writer service and the representation of a database's
//! effective content for diffing.
//!
//! A change set is either *delta mode* (may contain writes and resets, the
//! shape submitted to the writer) or *database mode* (only writes, no
//! resets, used to snapshot and diff a database's content). Sealing a
//! change set freezes it and derives a common-prefix/suffix-list
//! representation used by the wire encoder.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use settings_value::Value;

/// Errors raised by change set mutation and analysis.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The path failed `settings_path` validation.
    InvalidPath(settings_path::InvalidPath),
    /// Attempted to set a dir path to a value.
    DirValue,
    /// Attempted to reset a path in a database-mode change set.
    ResetInDatabaseMode,
    /// Attempted to mutate a sealed change set.
    Sealed,
    /// `diff`/`filter_changes` was called with a change set of the wrong
    /// mode for its role.
    WrongMode,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPath(e) => write!(f, "invalid path: {}", e),
            Error::DirValue => write!(f, "cannot set a value on a dir path"),
            Error::ResetInDatabaseMode => {
                write!(f, "cannot reset a path in a database-mode change set")
            }
            Error::Sealed => write!(f, "change set is sealed"),
            Error::WrongMode => {
                write!(f, "change set has the wrong mode for this operation")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<settings_path::InvalidPath> for Error {
    fn from(e: settings_path::InvalidPath) -> Error {
        Error::InvalidPath(e)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The tri-state result of `ChangeSet::get`.
#[derive(Debug, PartialEq)]
pub enum GetResult<'a> {
    /// The path has no entry in this change set.
    Absent,
    /// The path is recorded as a reset (key or dir).
    Reset,
    /// The path is recorded with a value.
    Value(&'a Value),
}

fn common_prefix(a: &str, b: &str) -> String {
    let (ab, bb) = (a.as_bytes(), b.as_bytes());
    let mut len = 0;
    while len < ab.len() && len < bb.len() && ab[len] == bb[len] {
        len += 1;
    }
    while !a.is_char_boundary(len) {
        len -= 1;
    }
    a[..len].to_owned()
}

/// An ordered `path -> Option<value>` mapping. See the module docs for mode
/// semantics.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    is_database: bool,
    sealed: bool,
    entries: Vec<(String, Option<Value>)>,
    index: HashMap<String, usize>,
    seal_prefix: String,
    seal_suffixes: Vec<String>,
    seal_values: Vec<Option<Value>>,
}

#[derive(Serialize, Deserialize)]
struct WireForm {
    is_database: bool,
    entries: Vec<(String, Option<Value>)>,
}

impl ChangeSet {
    /// An empty delta-mode change set.
    pub fn new() -> ChangeSet {
        ChangeSet {
            is_database: false,
            sealed: false,
            entries: Vec::new(),
            index: HashMap::new(),
            seal_prefix: String::new(),
            seal_suffixes: Vec::new(),
            seal_values: Vec::new(),
        }
    }

    /// An empty database-mode change set, optionally seeded from another
    /// database-mode change set.
    pub fn new_database(template: Option<&ChangeSet>) -> ChangeSet {
        let mut cs = ChangeSet {
            is_database: true,
            ..ChangeSet::new()
        };
        if let Some(t) = template {
            debug_assert!(
                t.is_database,
                "new_database's template must itself be database-mode"
            );
            for (k, v) in &t.entries {
                cs.insert(k.clone(), v.clone());
            }
        }
        cs
    }

    /// A delta-mode change set containing a single write (or reset, if
    /// `value` is `None`).
    pub fn new_write(path: &str, value: Option<Value>) -> Result<ChangeSet> {
        let mut cs = ChangeSet::new();
        cs.set(path, value)?;
        Ok(cs)
    }

    /// True if this change set represents a database snapshot rather than a
    /// delta to submit.
    pub fn is_database(&self) -> bool {
        self.is_database
    }

    /// True once `seal` has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn insert(&mut self, key: String, value: Option<Value>) {
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].1 = value;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    fn remove_key(&mut self, key: &str) {
        if let Some(idx) = self.index.remove(key) {
            self.entries.remove(idx);
            for (i, (k, _)) in self.entries.iter().enumerate().skip(idx) {
                self.index.insert(k.clone(), i);
            }
        }
    }

    fn remove_prefixed(&mut self, dir: &str) {
        let mut removed = Vec::new();
        self.entries.retain(|(k, _)| {
            if k.starts_with(dir) {
                removed.push(k.clone());
                false
            } else {
                true
            }
        });
        for k in &removed {
            self.index.remove(k);
        }
        for (i, (k, _)) in self.entries.iter().enumerate() {
            self.index.insert(k.clone(), i);
        }
    }

    /// Set `path` to `value` (or to a reset, if `value` is `None`),
    /// enforcing mode invariants. A dir reset drops every prior entry whose
    /// key has `path` as a string prefix before recording the reset.
    pub fn set(&mut self, path: &str, value: Option<Value>) -> Result<()> {
        if self.sealed {
            return Err(Error::Sealed);
        }

        if settings_path::is_key(path) {
            if value.is_none() && self.is_database {
                return Err(Error::ResetInDatabaseMode);
            }
            self.insert(path.to_owned(), value);
            return Ok(());
        }

        if settings_path::is_dir(path) {
            if value.is_some() {
                return Err(Error::DirValue);
            }
            if self.is_database {
                return Err(Error::ResetInDatabaseMode);
            }
            self.remove_prefixed(path);
            self.insert(path.to_owned(), None);
            return Ok(());
        }

        Err(Error::InvalidPath(
            settings_path::check_key(path).unwrap_err(),
        ))
    }

    /// Look up `key`'s tri-state entry.
    pub fn get(&self, key: &str) -> GetResult<'_> {
        match self.index.get(key) {
            Some(&idx) => match &self.entries[idx].1 {
                Some(v) => GetResult::Value(v),
                None => GetResult::Reset,
            },
            None => GetResult::Absent,
        }
    }

    /// Look up `key`'s value, collapsing "absent" and "reset" to `None`.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        match self.get(key) {
            GetResult::Value(v) => Some(v),
            _ => None,
        }
    }

    /// True if any entry's key has `dir` as a string prefix, regardless of
    /// whether that entry is a write or a reset. Used by callers (the
    /// engine's dir-reset redundancy check) that need to know whether a
    /// delta or a snapshot touches a subtree at all.
    pub fn any_key_under(&self, dir: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.starts_with(dir))
    }

    /// True if this change set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `self` and `other` touch exactly the same set of paths,
    /// regardless of the values recorded for them.
    pub fn is_similar_to(&self, other: &ChangeSet) -> bool {
        let keys: HashSet<&str> =
            self.entries.iter().map(|(k, _)| k.as_str()).collect();
        let other_keys: HashSet<&str> =
            other.entries.iter().map(|(k, _)| k.as_str()).collect();
        keys == other_keys
    }

    /// Visit every entry, in insertion order before sealing or sorted
    /// suffix order after, until `pred` returns `false`.
    pub fn all<F>(&self, mut pred: F)
    where
        F: FnMut(&str, Option<&Value>) -> bool,
    {
        if self.sealed {
            for (suffix, value) in
                self.seal_suffixes.iter().zip(self.seal_values.iter())
            {
                let full = format!("{}{}", self.seal_prefix, suffix);
                if !pred(&full, value.as_ref()) {
                    return;
                }
            }
        } else {
            for (k, v) in &self.entries {
                if !pred(k, v.as_ref()) {
                    return;
                }
            }
        }
    }

    /// Seal the change set: idempotent, computes the common prefix of all
    /// keys (trimmed to the last `/`), the sorted suffix list, and the
    /// aligned value list. After sealing, `set` fails with `Error::Sealed`.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;

        if self.entries.is_empty() {
            return;
        }

        if self.entries.len() == 1 {
            self.seal_prefix = self.entries[0].0.clone();
            self.seal_suffixes = vec![String::new()];
            self.seal_values = vec![self.entries[0].1.clone()];
            return;
        }

        let mut prefix = self.entries[0].0.clone();
        for (k, _) in &self.entries[1..] {
            prefix = common_prefix(&prefix, k);
        }
        let trimmed = match prefix.rfind('/') {
            Some(idx) => prefix[..=idx].to_owned(),
            None => String::new(),
        };

        let mut pairs: Vec<(String, Option<Value>)> = self
            .entries
            .iter()
            .map(|(k, v)| (k[trimmed.len()..].to_owned(), v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        self.seal_prefix = trimmed;
        self.seal_suffixes = pairs.iter().map(|(s, _)| s.clone()).collect();
        self.seal_values = pairs.into_iter().map(|(_, v)| v).collect();
    }

    /// Seal (if needed) and return the derived `(prefix, suffixes, values,
    /// count)` tuple.
    pub fn describe(
        &mut self,
    ) -> (&str, &[String], &[Option<Value>], usize) {
        self.seal();
        (
            &self.seal_prefix,
            &self.seal_suffixes,
            &self.seal_values,
            self.entries.len(),
        )
    }

    /// Read the derived `(prefix, suffixes, values)` of a change set that
    /// is already sealed, without requiring `&mut self`. Use this instead
    /// of [`ChangeSet::describe`] once a caller only has a shared
    /// reference (e.g. a delta already queued for a writer RPC).
    pub fn sealed_parts(&self) -> (&str, &[String], &[Option<Value>]) {
        debug_assert!(self.sealed, "sealed_parts called before seal()");
        (&self.seal_prefix, &self.seal_suffixes, &self.seal_values)
    }

    /// Encode to the compact wire form sent to the writer.
    pub fn serialize(&self) -> Vec<u8> {
        let wire = WireForm {
            is_database: self.is_database,
            entries: self.entries.clone(),
        };
        bincode::serialize(&wire).expect("ChangeSet always serializes")
    }

    /// Decode from the wire form. Malformed entries (invalid key paths,
    /// value-for-dir) are silently dropped; a wholly corrupt buffer yields
    /// an empty delta change set.
    pub fn deserialize(bytes: &[u8]) -> ChangeSet {
        let wire: WireForm = match bincode::deserialize(bytes) {
            Ok(w) => w,
            Err(e) => {
                log::warn!("dropping corrupt change set on deserialize: {}", e);
                return ChangeSet::new();
            }
        };
        let mut cs = if wire.is_database {
            ChangeSet::new_database(None)
        } else {
            ChangeSet::new()
        };
        for (path, value) in wire.entries {
            if let Err(e) = cs.set(&path, value) {
                log::warn!("dropping malformed change set entry {:?}: {}", path, e);
            }
        }
        cs
    }

    /// Merge `delta` into `self`, in sorted order so that a dir reset
    /// clears same-dir writes before sibling key writes are recorded. If
    /// `self` is database-mode, a reset removes the corresponding entry
    /// (or entries, for a dir reset) instead of recording a `None` marker,
    /// since database-mode change sets never carry resets themselves.
    pub fn apply(&mut self, delta: &ChangeSet) {
        debug_assert!(
            !delta.is_database,
            "apply's delta argument must be delta-mode"
        );

        let mut sorted = delta.entries.clone();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, value) in sorted {
            if self.is_database {
                match &value {
                    None if path.ends_with('/') => self.remove_prefixed(&path),
                    None => self.remove_key(&path),
                    Some(v) => self.insert(path, Some(v.clone())),
                }
            } else if let Err(e) = self.set(&path, value) {
                log::warn!("dropping entry while applying change set: {}", e);
            }
        }
    }

    /// Compute the minimal delta that, applied to a copy of `from`, yields
    /// `to`. Both arguments must be database-mode. Returns `None` if `from`
    /// and `to` have identical mappings.
    pub fn diff(from: &ChangeSet, to: &ChangeSet) -> Result<Option<ChangeSet>> {
        if !from.is_database || !to.is_database {
            return Err(Error::WrongMode);
        }

        let mut delta = ChangeSet::new();

        for (key, value) in &to.entries {
            let new_value =
                value.as_ref().expect("database-mode entries carry a value");
            if from.get_value(key) != Some(new_value) {
                delta.set(key, Some(new_value.clone()))?;
            }
        }

        for (key, _) in &from.entries {
            if to.get_value(key).is_none() {
                delta.set(key, None)?;
            }
        }

        Ok(if delta.is_empty() { None } else { Some(delta) })
    }

    /// Compute the subset of `delta`'s entries that would actually alter
    /// `base`. `base` must be database-mode; `delta` must be delta-mode.
    pub fn filter_changes(
        base: &ChangeSet,
        delta: &ChangeSet,
    ) -> Result<Option<ChangeSet>> {
        if !base.is_database || delta.is_database {
            return Err(Error::WrongMode);
        }

        let mut sealed_delta = delta.clone();
        let (prefix, suffixes, values, _count) = sealed_delta.describe();
        let prefix = prefix.to_owned();

        let mut out = ChangeSet::new();
        for (suffix, value) in suffixes.iter().zip(values.iter()) {
            let full = format!("{}{}", prefix, suffix);
            let keep = match value {
                None if full.ends_with('/') => base.any_key_under(&full),
                None => base.get_value(&full).is_some(),
                Some(v) => base.get_value(&full) != Some(v),
            };
            if keep {
                out.set(&full, value.clone())?;
            }
        }

        Ok(if out.is_empty() { None } else { Some(out) })
    }

    /// A snapshot of the current mapping, for test assertions and
    /// debugging. Resets appear as `None`.
    pub fn to_map(&self) -> BTreeMap<String, Option<Value>> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ChangeSet {
    fn default() -> ChangeSet {
        ChangeSet::new()
    }
}
