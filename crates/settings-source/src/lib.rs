//! One database layer of the engine's stack: its kind, name, writability
//! and RPC coordinates (static, lock-free), plus the GVDB/shm handles that
//! change as sources are refreshed (dynamic, engine-locked). Also resolves
//! and parses profile files into an ordered list of sources.

mod descriptor;
mod paths;
mod profile;
mod state;

pub use descriptor::{Kind, SourceDescriptor, WRITER_IFACE_NAME};
pub use paths::PathConfig;
pub use profile::resolve as resolve_profile;
pub use state::SourceState;
