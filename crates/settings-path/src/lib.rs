//! Predicates and validation for the slash-separated paths used to address
//! values in the settings store.
//!
//! A *key* path names a single value (`/org/example/greeting`). A *dir* path
//! names a subtree and always ends in `/` (`/org/example/`). Relative paths
//! are used as the suffixes recorded in a sealed change set and never begin
//! with `/`.

use std::fmt;

/// Why a candidate path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPath {
    /// The path was the empty string.
    Empty,
    /// An absolute path did not begin with `/`.
    NoLeadingSlash,
    /// The path contained `//` somewhere in the middle.
    DoubleSlash,
    /// The path's trailing slash did not match what the caller required.
    BadTrailing,
    /// A relative path began with `/`.
    LeadingSlashOnRel,
}

impl fmt::Display for InvalidPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            InvalidPath::Empty => write!(f, "path is empty"),
            InvalidPath::NoLeadingSlash => {
                write!(f, "absolute path must begin with '/'")
            }
            InvalidPath::DoubleSlash => {
                write!(f, "path contains a repeated '/'")
            }
            InvalidPath::BadTrailing => {
                write!(f, "path has the wrong kind of trailing slash")
            }
            InvalidPath::LeadingSlashOnRel => {
                write!(f, "relative path must not begin with '/'")
            }
        }
    }
}

impl std::error::Error for InvalidPath {}

type Result<T> = std::result::Result<T, InvalidPath>;

fn no_internal_double_slash(s: &str) -> bool {
    !s.as_bytes().windows(2).any(|w| w == b"//")
}

/// True if `s` is a valid absolute path (either a key or a dir).
pub fn is_path(s: &str) -> bool {
    validate_path(s).is_ok()
}

fn validate_path(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(InvalidPath::Empty);
    }
    if !s.starts_with('/') {
        return Err(InvalidPath::NoLeadingSlash);
    }
    if !no_internal_double_slash(s) {
        return Err(InvalidPath::DoubleSlash);
    }
    Ok(())
}

/// True if `s` is an absolute key path: starts with `/`, has no internal
/// `//`, and does not end with `/`.
pub fn is_key(s: &str) -> bool {
    validate_path(s).is_ok() && !s.ends_with('/')
}

/// True if `s` is an absolute dir path: starts with `/`, has no internal
/// `//`, and ends with `/`.
pub fn is_dir(s: &str) -> bool {
    validate_path(s).is_ok() && s.ends_with('/')
}

fn validate_rel(s: &str) -> Result<()> {
    if s.is_empty() {
        return Ok(());
    }
    if s.starts_with('/') {
        return Err(InvalidPath::LeadingSlashOnRel);
    }
    if !no_internal_double_slash(s) {
        return Err(InvalidPath::DoubleSlash);
    }
    Ok(())
}

/// True if `s` is a valid relative path: does not begin with `/` and has no
/// internal `//`. The empty string is a valid relative path (it names "this
/// dir itself" when used as a change-set suffix).
pub fn is_rel_path(s: &str) -> bool {
    validate_rel(s).is_ok()
}

/// True if `s` is a relative dir path: valid relative path ending in `/`, or
/// the empty string.
pub fn is_rel_dir(s: &str) -> bool {
    validate_rel(s).is_ok() && (s.is_empty() || s.ends_with('/'))
}

/// True if `s` is a relative key path: valid relative path, non-empty, and
/// not ending in `/`.
pub fn is_rel_key(s: &str) -> bool {
    validate_rel(s).is_ok() && !s.is_empty() && !s.ends_with('/')
}

/// Validate `s` as a key path, returning the specific violation on failure.
pub fn check_key(s: &str) -> Result<()> {
    validate_path(s)?;
    if s.ends_with('/') {
        return Err(InvalidPath::BadTrailing);
    }
    Ok(())
}

/// Validate `s` as a dir path, returning the specific violation on failure.
pub fn check_dir(s: &str) -> Result<()> {
    validate_path(s)?;
    if !s.ends_with('/') {
        return Err(InvalidPath::BadTrailing);
    }
    Ok(())
}

/// Returns the nearest enclosing dir of `p`, which must be a key or a dir
/// other than `/`.
///
/// `parent_of("/a/b/c")` is `"/a/b/"`; `parent_of("/a/")` is `"/a/"`'s parent,
/// `"/"`; `parent_of("/x")` is `"/"`. Undefined (panics) on `"/"` itself,
/// which has no parent.
pub fn parent_of(p: &str) -> String {
    assert!(p != "/", "the root has no parent");
    assert!(is_path(p), "parent_of called on an invalid path: {:?}", p);

    let trimmed = p.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(idx) => format!("{}/", &trimmed[..idx]),
        None => "/".to_owned(),
    }
}

/// True if `maybe_prefix` is a dir path that is a prefix of (or equal to)
/// `path`, treating strings literally (a dir's trailing slash makes this a
/// real prefix test, not merely a string prefix test).
pub fn dir_contains(dir: &str, path: &str) -> bool {
    debug_assert!(is_dir(dir));
    path.starts_with(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_vs_dir() {
        assert!(is_key("/a/b"));
        assert!(!is_dir("/a/b"));
        assert!(is_dir("/a/b/"));
        assert!(!is_key("/a/b/"));
        assert!(is_dir("/"));
        assert!(!is_key("/"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(!is_path(""));
        assert!(!is_path("a/b"));
        assert!(!is_path("/a//b"));
    }

    #[test]
    fn relative_paths() {
        assert!(is_rel_key("a/b"));
        assert!(!is_rel_key("a/b/"));
        assert!(is_rel_dir("a/b/"));
        assert!(is_rel_dir(""));
        assert!(!is_rel_path("/a"));
        assert!(!is_rel_path("a//b"));
    }

    #[test]
    fn parent_walks_up() {
        assert_eq!(parent_of("/a/b/c"), "/a/b/");
        assert_eq!(parent_of("/a/b/"), "/a/");
        assert_eq!(parent_of("/a/"), "/");
        assert_eq!(parent_of("/x"), "/");
    }

    #[test]
    #[should_panic]
    fn parent_of_root_panics() {
        let _ = parent_of("/");
    }

    #[test]
    fn check_key_reports_violation() {
        assert_eq!(check_key(""), Err(InvalidPath::Empty));
        assert_eq!(check_key("a"), Err(InvalidPath::NoLeadingSlash));
        assert_eq!(check_key("/a/"), Err(InvalidPath::BadTrailing));
        assert_eq!(check_dir("/a"), Err(InvalidPath::BadTrailing));
        assert!(check_key("/a/b").is_ok());
    }
}
