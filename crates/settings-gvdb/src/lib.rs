//! A reader (and, for fixture construction, a writer) for the little-endian
//! GVDB hash-file format used to persist a single database layer.
//!
//! The file is a header plus one or more hash tables; tables may nest (used
//! for the `.locks` subtable). Lookups hash the full absolute path with a
//! djb2-style polynomial hash and walk a bucket's collision chain comparing
//! full keys, matching the "keys are looked up by matching the full parent
//! chain" wording in the format description. See `DESIGN.md` for the exact
//! byte layout chosen where the format description leaves freedom.

mod format;
mod reader;
mod writer;

pub use format::djb2;
pub use reader::{Error, Gvdb};
pub use writer::GvdbBuilder;
