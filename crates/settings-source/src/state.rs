//! The mutable half of a source: the currently-open GVDB handle and the
//! shm invalidation handle it is checked against. Kept separate from
//! [`crate::descriptor::SourceDescriptor`] so the engine can hold every
//! source's dynamic state behind one lock (§4.5, "correctness
//! requirement") without also locking the immutable attributes.

use std::path::Path;

use settings_gvdb::{Error as GvdbError, Gvdb};
use settings_shm::FlagHandle;
use settings_wire::{Args, WireAdapter};

use crate::descriptor::{Kind, SourceDescriptor};

fn open_db(path: &Path, use_mmap: bool) -> Result<Gvdb, GvdbError> {
    if use_mmap {
        Gvdb::open(path)
    } else {
        let bytes = std::fs::read(path)?;
        Ok(Gvdb::from_bytes(bytes))
    }
}

/// Dynamic per-source state: the open GVDB (if any) and its shm flag
/// handle. `system_warned`/`opened_once` track the kind-specific
/// one-shot-warning behavior described in §4.5.
pub struct SourceState {
    gvdb: Option<Gvdb>,
    flag: Option<FlagHandle>,
    system_warned: bool,
    opened_once: bool,
}

impl SourceState {
    pub fn new() -> SourceState {
        SourceState { gvdb: None, flag: None, system_warned: false, opened_once: false }
    }

    pub fn values(&self) -> Option<&Gvdb> {
        self.gvdb.as_ref()
    }

    pub fn locks(&self) -> Option<Gvdb> {
        self.gvdb.as_ref().and_then(|g| g.get_subtable(".locks"))
    }

    pub fn free(&mut self) {
        self.gvdb = None;
        if let Some(flag) = self.flag.take() {
            settings_shm::close(flag);
        }
    }

    /// Re-evaluate this source against its on-disk/shm state, returning
    /// whether the GVDB handle was (re)opened. `shm_base` is the runtime
    /// directory shared-memory cells live under; `wire` is used only by
    /// the `service` kind, to request the writer materialize a missing
    /// database file; `use_mmap` selects between `memmap2`-backed and
    /// fully-read-into-memory decoding (construction-time config knob).
    pub fn refresh(
        &mut self,
        desc: &SourceDescriptor,
        shm_base: &Path,
        wire: &dyn WireAdapter,
        use_mmap: bool,
    ) -> bool {
        match desc.kind {
            Kind::User | Kind::UserNfsProxied => self.refresh_user(desc, shm_base, use_mmap),
            Kind::System => self.refresh_system(desc, use_mmap),
            Kind::File => self.refresh_file(desc, use_mmap),
            Kind::Service => self.refresh_service(desc, wire, use_mmap),
            Kind::ConfinedProxy => false,
        }
    }

    fn ensure_flag(&mut self, desc: &SourceDescriptor, shm_base: &Path) -> bool {
        if self.flag.is_none() {
            self.flag = Some(settings_shm::open(shm_base, &desc.name));
        }
        self.flag.as_ref().map(|f| f.is_flagged()).unwrap_or(true)
    }

    fn refresh_user(&mut self, desc: &SourceDescriptor, shm_base: &Path, use_mmap: bool) -> bool {
        let flagged = self.ensure_flag(desc, shm_base);
        if self.gvdb.is_none() {
            self.reopen(desc, use_mmap);
            return true;
        }
        let invalid = self.gvdb.as_ref().map(|g| !g.is_valid()).unwrap_or(true);
        if flagged || invalid {
            self.reopen(desc, use_mmap);
            true
        } else {
            false
        }
    }

    fn refresh_system(&mut self, desc: &SourceDescriptor, use_mmap: bool) -> bool {
        if let Some(gvdb) = &self.gvdb {
            if gvdb.is_valid() {
                return false;
            }
            self.reopen(desc, use_mmap);
            return true;
        }
        match open_db(&desc.db_path, use_mmap) {
            Ok(gvdb) => {
                self.gvdb = Some(gvdb);
                self.opened_once = true;
                true
            }
            Err(e) => {
                if !self.system_warned {
                    log::warn!("opening system source {:?}: {}", desc.db_path, e);
                    self.system_warned = true;
                }
                false
            }
        }
    }

    fn refresh_file(&mut self, desc: &SourceDescriptor, use_mmap: bool) -> bool {
        if self.opened_once {
            return false;
        }
        self.opened_once = true;
        match open_db(&desc.db_path, use_mmap) {
            Ok(gvdb) => {
                self.gvdb = Some(gvdb);
                true
            }
            Err(e) => {
                log::warn!("opening file source {:?}: {}", desc.db_path, e);
                false
            }
        }
    }

    fn refresh_service(&mut self, desc: &SourceDescriptor, wire: &dyn WireAdapter, use_mmap: bool) -> bool {
        if self.gvdb.is_some() {
            return false;
        }
        if open_db(&desc.db_path, use_mmap).is_ok() {
            self.reopen(desc, use_mmap);
            return true;
        }
        if let Some(endpoint) = &desc.endpoint {
            let iface = crate::descriptor::WRITER_IFACE_NAME;
            if let Err(e) = wire.call_sync(endpoint, iface, "Init", Args::None) {
                log::error!("service source {} failed to initialize: {}", desc.name, e);
                return false;
            }
        }
        match open_db(&desc.db_path, use_mmap) {
            Ok(gvdb) => {
                self.gvdb = Some(gvdb);
                true
            }
            Err(e) => panic!("service source {} still missing after Init: {}", desc.name, e),
        }
    }

    fn reopen(&mut self, desc: &SourceDescriptor, use_mmap: bool) {
        match open_db(&desc.db_path, use_mmap) {
            Ok(gvdb) => self.gvdb = Some(gvdb),
            Err(e) => log::warn!("reopening source {:?}: {}", desc.db_path, e),
        }
    }
}

impl Default for SourceState {
    fn default() -> SourceState {
        SourceState::new()
    }
}
