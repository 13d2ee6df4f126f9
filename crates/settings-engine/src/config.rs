//! Construction-time knobs for an [`crate::Engine`]: a fluent, consuming
//! builder that produces one immutable value, read once at construction
//! and never again.

use std::path::PathBuf;

/// Immutable engine construction parameters.
///
/// Built fluently: start from [`EngineConfig::default`] and chain overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) profile: Option<String>,
    pub(crate) runtime_dir: Option<PathBuf>,
    pub(crate) use_mmap: bool,
    pub(crate) uid: String,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            profile: None,
            runtime_dir: None,
            use_mmap: true,
            uid: current_uid(),
        }
    }
}

impl EngineConfig {
    /// Resolve against an explicitly named profile instead of the default
    /// chain (mandatory profile, `DCONF_PROFILE`, runtime profile file,
    /// `user`, synthesized default).
    pub fn profile(mut self, name: impl Into<String>) -> EngineConfig {
        self.profile = Some(name.into());
        self
    }

    /// Override the runtime directory shm invalidation cells are read
    /// from and written to. Defaults to `settings_shm::default_base_dir()`.
    pub fn runtime_dir(mut self, dir: impl Into<PathBuf>) -> EngineConfig {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// `true` (the default) mmaps each source's GVDB file; `false` reads
    /// it fully into memory up front. See `settings_source::SourceState`.
    pub fn use_mmap(mut self, enabled: bool) -> EngineConfig {
        self.use_mmap = enabled;
        self
    }

    /// Override the uid used to resolve the per-user mandatory profile.
    /// Exists for tests; production engines use the real uid.
    pub fn uid(mut self, uid: impl Into<String>) -> EngineConfig {
        self.uid = uid.into();
        self
    }
}

#[cfg(unix)]
fn current_uid() -> String {
    unsafe { libc::getuid() }.to_string()
}

#[cfg(not(unix))]
fn current_uid() -> String {
    "0".to_owned()
}
