use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use settings_value::Value;

use crate::format::{self, ItemRecord};

/// Errors that can arise while opening a GVDB file. Neither is surfaced to
/// engine callers directly; sources downgrade both to a warning and a
/// missing source (see `settings-source`).
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Corrupt(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error opening database: {}", e),
            Error::Corrupt(msg) => write!(f, "corrupt database: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

type Result<T> = std::result::Result<T, Error>;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => &m[..],
            Backing::Owned(v) => &v[..],
        }
    }
}

/// A read-only handle onto a GVDB hash table. Opening a file produces a
/// handle over the *root* table; `get_subtable` returns a handle sharing
/// the same backing bytes but rooted at a nested table's byte range, so a
/// subtable handle observes the same invalidation as its parent.
pub struct Gvdb {
    backing: Arc<Backing>,
    swapped: bool,
    table_start: u32,
    table_end: u32,
}

impl Gvdb {
    /// Memory-map `path` and open its root table.
    pub fn open(path: impl AsRef<Path>) -> Result<Gvdb> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and this crate never assumes the
        // backing file stays unmodified -- invalidation is detected instead
        // by the zeroed-signature convention, not by excluding concurrent
        // writers.
        let mmap = unsafe { Mmap::map(&file)? };
        Gvdb::from_backing(Backing::Mapped(mmap))
    }

    /// Open a root table directly from an owned byte buffer (used by tests
    /// and by callers that already have the bytes in memory).
    pub fn from_bytes(bytes: Vec<u8>) -> Gvdb {
        Gvdb::from_backing(Backing::Owned(bytes))
            .unwrap_or_else(|e| {
                log::warn!("treating corrupt in-memory database as invalid: {}", e);
                Gvdb::invalid()
            })
    }

    fn invalid() -> Gvdb {
        Gvdb {
            backing: Arc::new(Backing::Owned(vec![0u8; format::HEADER_LEN])),
            swapped: false,
            table_start: 0,
            table_end: 0,
        }
    }

    fn from_backing(backing: Backing) -> Result<Gvdb> {
        let bytes = backing.bytes();
        if bytes.len() < format::HEADER_LEN {
            return Err(Error::Corrupt("file shorter than header".into()));
        }
        if bytes[0..8].iter().all(|&b| b == 0) {
            // Zeroed signature: a deliberately invalidated database. Treat
            // as an empty, permanently-invalid handle rather than an error.
            return Ok(Gvdb {
                backing: Arc::new(backing),
                swapped: false,
                table_start: 0,
                table_end: 0,
            });
        }
        if bytes[0..8] != format::SIGNATURE {
            return Err(Error::Corrupt("bad signature".into()));
        }
        let flags = format::read_u32(bytes, 12, false);
        let swapped = flags & format::FLAG_SWAPPED != 0;
        let table_start = format::read_u32(bytes, 16, swapped);
        let table_end = format::read_u32(bytes, 20, swapped);
        if table_end as usize > bytes.len() || table_start > table_end {
            return Err(Error::Corrupt("root pointer out of bounds".into()));
        }
        Ok(Gvdb { backing: Arc::new(backing), swapped, table_start, table_end })
    }

    fn subtable(&self, start: u32, end: u32) -> Gvdb {
        Gvdb {
            backing: Arc::clone(&self.backing),
            swapped: self.swapped,
            table_start: start,
            table_end: end,
        }
    }

    /// `false` once the backing storage has been signaled invalid: either
    /// this handle was opened over an already-zeroed file, or the
    /// underlying bytes were zeroed after the fact (the writer's atomic
    /// invalidate-then-replace convention).
    pub fn is_valid(&self) -> bool {
        let bytes = self.backing.bytes();
        bytes.len() >= 8 && !bytes[0..8].iter().all(|&b| b == 0)
    }

    fn bytes(&self) -> &[u8] {
        self.backing.bytes()
    }

    fn n_buckets(&self) -> usize {
        if self.table_end <= self.table_start {
            return 0;
        }
        format::read_u32(self.bytes(), self.table_start as usize, self.swapped) as usize
    }

    fn n_items(&self) -> usize {
        if self.table_end <= self.table_start {
            return 0;
        }
        format::read_u32(self.bytes(), self.table_start as usize + 4, self.swapped) as usize
    }

    fn bucket_head(&self, bucket: usize) -> u32 {
        let off = self.table_start as usize + 8 + bucket * 4;
        format::read_u32(self.bytes(), off, self.swapped)
    }

    fn item(&self, index: u32) -> ItemRecord {
        let n_buckets = self.n_buckets();
        let off = self.table_start as usize + 8 + n_buckets * 4 + index as usize * format::ITEM_LEN;
        ItemRecord::read(self.bytes(), off, self.swapped)
    }

    fn item_key<'a>(&'a self, item: &ItemRecord) -> &'a str {
        let bytes = &self.bytes()[item.key_start as usize..item.key_end as usize];
        std::str::from_utf8(bytes).unwrap_or("")
    }

    fn find_item(&self, key: &str) -> Option<ItemRecord> {
        if !self.is_valid() {
            return None;
        }
        let n_buckets = self.n_buckets();
        if n_buckets == 0 {
            return None;
        }
        let hash = format::djb2(key.as_bytes());
        let mut idx = self.bucket_head(hash as usize % n_buckets);
        while idx != format::EMPTY_BUCKET {
            let item = self.item(idx);
            if item.hash == hash && self.item_key(&item) == key {
                return Some(item);
            }
            idx = item.parent;
        }
        None
    }

    /// Hash-lookup for a key's presence, without decoding its value.
    pub fn has_value(&self, key: &str) -> bool {
        matches!(self.find_item(key), Some(item) if item.type_marker == format::TYPE_VALUE)
    }

    /// Look up and decode `key`'s leaf value. `None` if absent, a
    /// subtable, or the stored bytes fail to decode as a `Value`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let item = self.find_item(key)?;
        if item.type_marker != format::TYPE_VALUE {
            return None;
        }
        let bytes = &self.bytes()[item.value_start as usize..item.value_end as usize];
        Value::decode(bytes)
    }

    /// Look up a nested table (used for `.locks` and `.locks/<key>`-style
    /// paths into it).
    pub fn get_subtable(&self, key: &str) -> Option<Gvdb> {
        let item = self.find_item(key)?;
        if item.type_marker != format::TYPE_TABLE {
            return None;
        }
        Some(self.subtable(item.value_start, item.value_end))
    }

    fn all_items(&self) -> Vec<ItemRecord> {
        if !self.is_valid() {
            return Vec::new();
        }
        (0..self.n_items() as u32).map(|i| self.item(i)).collect()
    }

    /// Immediate child names of `dir` (itself excluded): leaf keys are
    /// returned as their relative suffix, subtables with a trailing `/`.
    pub fn list(&self, dir: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for item in self.all_items() {
            let key = self.item_key(&item);
            if !settings_path::dir_contains(dir, key) || key == dir {
                continue;
            }
            let rest = &key[dir.len()..];
            let child = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if seen.insert(child.to_owned()) {
                out.push(child.to_owned());
            }
        }
        out
    }

    /// All keys present in this table (leaves only; does not recurse into
    /// subtables, matching `get_names`' contract of naming entries of this
    /// table).
    pub fn get_names(&self) -> Vec<String> {
        self.all_items()
            .iter()
            .map(|item| self.item_key(item).to_owned())
            .collect()
    }
}
