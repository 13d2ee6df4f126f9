use std::fmt;

use settings_wire::WireError;

/// Caller-visible failures (§7). `Corrupt`/`OpenFailed` never reach here --
/// those are downgraded to warnings inside `settings-source` and leave a
/// source contributing nothing until a later refresh succeeds.
#[derive(Debug, PartialEq)]
pub enum Error {
    InvalidPath(settings_path::InvalidPath),
    NotWritable,
    Failed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPath(e) => write!(f, "invalid path: {}", e),
            Error::NotWritable => write!(f, "not writable"),
            Error::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<settings_path::InvalidPath> for Error {
    fn from(e: settings_path::InvalidPath) -> Error {
        Error::InvalidPath(e)
    }
}

impl From<settings_changeset::Error> for Error {
    fn from(e: settings_changeset::Error) -> Error {
        match e {
            settings_changeset::Error::InvalidPath(p) => Error::InvalidPath(p),
            other => Error::Failed(other.to_string()),
        }
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Error {
        match e {
            WireError::NotWritable => Error::NotWritable,
            WireError::Failed(msg) => Error::Failed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
