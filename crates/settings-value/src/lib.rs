//! A typed tagged value, the unit of storage for a single key.
//!
//! This is a minimal stand-in for the variant type system the rest of the
//! engine is built on top of. It carries just enough structure (scalars,
//! arrays, tuples, dictionaries) to exercise the change-set and GVDB layers;
//! a production build would plug in the host toolkit's own variant type
//! instead of this one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed value. Equality and ordering are structural.
#[derive(Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed 16-bit integer.
    I16(i16),
    /// An unsigned 16-bit integer.
    U16(u16),
    /// A signed 32-bit integer.
    I32(i32),
    /// An unsigned 32-bit integer.
    U32(u32),
    /// A signed 64-bit integer.
    I64(i64),
    /// An unsigned 64-bit integer.
    U64(u64),
    /// An IEEE double.
    Double(f64),
    /// A UTF-8 string.
    Str(String),
    /// A homogeneous array of values.
    Array(Vec<Value>),
    /// A fixed-arity heterogeneous tuple ("struct" in GVariant terms).
    Tuple(Vec<Value>),
    /// A string-keyed dictionary.
    Dict(Vec<(String, Value)>),
}

impl Value {
    /// A one-byte tag identifying the variant's shape, used by the GVDB
    /// item-record type marker.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Bool(_) => b'b',
            Value::I16(_) => b'n',
            Value::U16(_) => b'q',
            Value::I32(_) => b'i',
            Value::U32(_) => b'u',
            Value::I64(_) => b'x',
            Value::U64(_) => b't',
            Value::Double(_) => b'd',
            Value::Str(_) => b's',
            Value::Array(_) => b'a',
            Value::Tuple(_) => b'r',
            Value::Dict(_) => b'e',
        }
    }

    /// Encode to the compact binary form used inside a GVDB item and inside
    /// serialized change sets.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("Value always serializes")
    }

    /// Decode from the compact binary form.
    pub fn decode(bytes: &[u8]) -> Option<Value> {
        bincode::deserialize(bytes).ok()
    }
}

fn escape_str(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "'")?;
    for c in s.chars() {
        match c {
            '\'' => write!(f, "\\'")?,
            '\\' => write!(f, "\\\\")?,
            _ => write!(f, "{}", c)?,
        }
    }
    write!(f, "'")
}

impl fmt::Display for Value {
    /// Render the canonical printable form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Str(s) => escape_str(s, f),
            Value::Array(items) | Value::Tuple(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}
