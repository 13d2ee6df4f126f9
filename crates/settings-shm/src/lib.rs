//! One-byte shared-memory invalidation flags, one file per database name,
//! living in a per-user runtime directory.
//!
//! The writer side (only exercised by the writer service and by this
//! crate's own test mocks, since the real writer is out of scope) sets a
//! cell nonzero with [`flag`]. The reader side opens a stable handle with
//! [`open`] and polls it with [`FlagHandle::is_flagged`]. Handle creation
//! never fails outwardly: if the cell cannot be created (read-only runtime
//! dir, out of space, ...) the reader falls back to a sentinel that always
//! reports flagged, so every refresh reopens its source instead of trusting
//! a signal that might never arrive.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

/// Resolve the default per-user runtime directory for flag cells: the XDG
/// runtime dir if set, else a temp directory, mirroring the same
/// shared-memory-preferring fallback the rest of this corpus's ambient
/// config layer uses for scratch files.
pub fn default_base_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("settings-engine")
}

fn cell_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(name)
}

fn ensure_cell(base_dir: &Path, name: &str) -> io::Result<PathBuf> {
    std::fs::create_dir_all(base_dir)?;
    let path = cell_path(base_dir, name);
    let file = OpenOptions::new().create(true).write(true).read(true).open(&path)?;
    if file.metadata()?.len() < 1 {
        file.set_len(1)?;
    }
    Ok(path)
}

/// Writer side: atomically set `name`'s flag cell to nonzero, creating it
/// if it does not exist yet.
pub fn flag(base_dir: &Path, name: &str) -> io::Result<()> {
    let path = ensure_cell(base_dir, name)?;
    let file = OpenOptions::new().write(true).read(true).open(path)?;
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    mmap[0] = 1;
    mmap.flush()?;
    Ok(())
}

enum Backing {
    Mapped(Mmap),
    AlwaysFlagged,
}

/// A reader-side handle on one database's flag cell.
pub struct FlagHandle {
    backing: Backing,
}

impl FlagHandle {
    /// `true` iff the writer has set this cell since it was created.
    pub fn is_flagged(&self) -> bool {
        match &self.backing {
            Backing::Mapped(m) => m.first().copied().unwrap_or(1) != 0,
            Backing::AlwaysFlagged => true,
        }
    }
}

/// Reader side: ensure `name`'s cell exists (initially zero) and return a
/// stable handle onto it. Never fails; falls back to an always-flagged
/// sentinel on any I/O error.
pub fn open(base_dir: &Path, name: &str) -> FlagHandle {
    match ensure_cell(base_dir, name).and_then(|path| {
        let file = OpenOptions::new().read(true).open(path)?;
        unsafe { Mmap::map(&file) }
    }) {
        Ok(mmap) => FlagHandle { backing: Backing::Mapped(mmap) },
        Err(e) => {
            log::warn!(
                "falling back to always-flagged for shm cell {:?}: {}",
                name,
                e
            );
            FlagHandle { backing: Backing::AlwaysFlagged }
        }
    }
}

/// Reader side: release the handle. A thin wrapper over `drop` kept as a
/// named operation so callers have an explicit, symmetric counterpart to `open`.
pub fn close(handle: FlagHandle) {
    drop(handle);
}
