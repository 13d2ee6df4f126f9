//! Builds GVDB byte buffers. The writer service that owns the real on-disk
//! format is out of scope for this crate (see the top-level design notes);
//! this builder exists so the reader below, and the sources/engine crates
//! that sit on top of it, have a way to construct fixtures without a running
//! writer process.

use std::collections::BTreeMap;

use settings_value::Value;

use crate::format::{self, ItemRecord};

/// One entry in a table under construction: either a leaf value or a nested
/// subtable (used for `.locks`).
pub enum Entry {
    Value(Value),
    Table(GvdbBuilder),
}

/// An in-progress hash table, keyed by full absolute path.
#[derive(Default)]
pub struct GvdbBuilder {
    entries: BTreeMap<String, Entry>,
}

impl GvdbBuilder {
    pub fn new() -> GvdbBuilder {
        GvdbBuilder { entries: BTreeMap::new() }
    }

    pub fn insert(&mut self, key: &str, value: Value) -> &mut GvdbBuilder {
        self.entries.insert(key.to_owned(), Entry::Value(value));
        self
    }

    pub fn insert_table(&mut self, key: &str, table: GvdbBuilder) -> &mut GvdbBuilder {
        self.entries.insert(key.to_owned(), Entry::Table(table));
        self
    }

    /// Serialize into a complete GVDB file image.
    pub fn build(self) -> Vec<u8> {
        let mut buf = vec![0u8; format::HEADER_LEN];
        let (root_start, root_end) = write_table(&mut buf, self);

        buf[0..8].copy_from_slice(&format::SIGNATURE);
        buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        buf[12..16].copy_from_slice(&0u32.to_le_bytes());
        buf[16..20].copy_from_slice(&root_start.to_le_bytes());
        buf[20..24].copy_from_slice(&root_end.to_le_bytes());
        buf
    }
}

/// Appends `table`'s serialized bytes (and, recursively, any nested
/// subtables' bytes) to `buf`, returning the `[start, end)` byte range of
/// the table's own bucket/item arrays within `buf`.
fn write_table(buf: &mut Vec<u8>, table: GvdbBuilder) -> (u32, u32) {
    let n_items = table.entries.len();
    let n_buckets = n_items.max(1);

    // Resolve nested subtables and leaf values first, recording absolute
    // byte ranges, before laying out this table's own item records (which
    // reference those ranges).
    struct Resolved {
        hash: u32,
        key_start: u32,
        key_end: u32,
        type_marker: u8,
        value_start: u32,
        value_end: u32,
    }

    let mut resolved = Vec::with_capacity(n_items);
    for (key, entry) in table.entries {
        let hash = format::djb2(key.as_bytes());
        let key_start = buf.len() as u32;
        buf.extend_from_slice(key.as_bytes());
        let key_end = buf.len() as u32;

        let (type_marker, value_start, value_end) = match entry {
            Entry::Value(v) => {
                let encoded = v.encode();
                let start = buf.len() as u32;
                buf.extend_from_slice(&encoded);
                let end = buf.len() as u32;
                (format::TYPE_VALUE, start, end)
            }
            Entry::Table(nested) => {
                let (start, end) = write_table(buf, nested);
                (format::TYPE_TABLE, start, end)
            }
        };

        resolved.push(Resolved { hash, key_start, key_end, type_marker, value_start, value_end });
    }

    // Bucket chains: append items in insertion order, recording per-bucket
    // chain heads as we go so each new item's `parent` points at the prior
    // head for its bucket.
    let mut bucket_heads = vec![format::EMPTY_BUCKET; n_buckets];
    let mut items = Vec::with_capacity(n_items);
    for r in resolved {
        let bucket = (r.hash as usize) % n_buckets;
        let parent = bucket_heads[bucket];
        items.push(ItemRecord {
            hash: r.hash,
            parent,
            key_start: r.key_start,
            key_end: r.key_end,
            type_marker: r.type_marker,
            value_start: r.value_start,
            value_end: r.value_end,
        });
        bucket_heads[bucket] = (items.len() - 1) as u32;
    }

    let table_start = buf.len() as u32;
    buf.extend_from_slice(&(n_buckets as u32).to_le_bytes());
    buf.extend_from_slice(&(n_items as u32).to_le_bytes());
    for head in &bucket_heads {
        buf.extend_from_slice(&head.to_le_bytes());
    }
    for item in &items {
        item.write(buf);
    }
    let table_end = buf.len() as u32;
    (table_start, table_end)
}
