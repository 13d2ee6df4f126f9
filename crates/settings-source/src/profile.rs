//! Profile resolution and parsing (§4.6): turning an optional profile name
//! into an ordered list of [`SourceDescriptor`]s.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::descriptor::SourceDescriptor;
use crate::paths::PathConfig;

/// Resolve and parse a profile. `name` is the caller-supplied profile
/// name, if any (e.g. from an app's `DCONF_PROFILE`-equivalent argument).
/// Falls through runtime profile, named profile, and default-profile
/// resolution in order, stopping at the first step that produces a file
/// or a synthesized result.
pub fn resolve(name: Option<&str>, uid: &str, paths: &PathConfig) -> Vec<SourceDescriptor> {
    if name.is_none() {
        let mandatory = paths.runtime_dir.join("dconf-mandatory").join(uid);
        if let Some(text) = try_read(&mandatory) {
            return parse(&text, paths);
        }
    }

    let name = match name {
        Some(n) => n.to_owned(),
        None => match env::var("DCONF_PROFILE") {
            Ok(v) if !v.is_empty() => v,
            _ => String::new(),
        },
    };

    if name.is_empty() {
        let runtime_profile = paths.runtime_dir.join("dconf").join("profile");
        if let Some(text) = try_read(&runtime_profile) {
            return parse(&text, paths);
        }

        if let Some((path, text)) = find_named("user", paths) {
            log::debug!("resolved default profile at {:?}", path);
            return parse(&text, paths);
        }

        return vec![SourceDescriptor::parse("user-db:user", paths)]
            .into_iter()
            .flatten()
            .collect();
    }

    let candidate = PathBuf::from(&name);
    if candidate.is_absolute() {
        return match try_read(&candidate) {
            Some(text) => parse(&text, paths),
            None => {
                log::warn!("profile {:?} could not be opened; using the null profile", candidate);
                Vec::new()
            }
        };
    }

    match find_named(&name, paths) {
        Some((_, text)) => parse(&text, paths),
        None => {
            log::warn!("profile {:?} could not be found; using the null profile", name);
            Vec::new()
        }
    }
}

fn find_named(name: &str, paths: &PathConfig) -> Option<(PathBuf, String)> {
    let sysconf = paths.sysconf_profile_dir.join(name);
    if let Some(text) = try_read(&sysconf) {
        return Some((sysconf, text));
    }
    for dir in &paths.data_profile_dirs {
        let candidate = dir.join(name);
        if let Some(text) = try_read(&candidate) {
            return Some((candidate, text));
        }
    }
    None
}

fn try_read(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// Parse profile file contents into an ordered list of descriptors.
/// `#` starts a line comment; leading/trailing whitespace is trimmed;
/// blank lines are skipped; lines that fail to parse as a known source
/// descriptor are warned about and skipped, preserving the order of the
/// lines that do parse.
fn parse(text: &str, paths: &PathConfig) -> Vec<SourceDescriptor> {
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let line = match raw_line.split_once('#') {
            Some((before, _)) => before,
            None => raw_line,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        match SourceDescriptor::parse(line, paths) {
            Some(desc) => out.push(desc),
            None => log::warn!("ignoring unparsable profile line: {:?}", line),
        }
    }
    out
}
