//! Filesystem locations the source and profile layers need, resolved once
//! at engine construction (mirrors the construction-time knobs a
//! `ConfigBuilder` would carry elsewhere in this stack).

use std::env;
use std::path::PathBuf;

/// Where on disk each kind of database and profile file lives. All fields
/// have environment-derived defaults via [`PathConfig::from_env`] but can
/// be overridden wholesale for tests.
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub user_db_dir: PathBuf,
    pub system_db_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub sysconf_profile_dir: PathBuf,
    pub data_profile_dirs: Vec<PathBuf>,
}

impl PathConfig {
    /// Resolve every directory from the environment, the way the writer's
    /// own profile chain does: `$XDG_RUNTIME_DIR` (falling back to a temp
    /// dir), `$SYSCONFDIR` (defaulting to `/etc`), and `$XDG_DATA_DIRS`
    /// (defaulting to `/usr/local/share:/usr/share`).
    pub fn from_env() -> PathConfig {
        let runtime_dir = dirs::runtime_dir().unwrap_or_else(env::temp_dir);
        let sysconfdir = env::var("SYSCONFDIR").unwrap_or_else(|_| "/etc".to_owned());
        let data_dirs = env::var("XDG_DATA_DIRS")
            .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_owned());

        PathConfig {
            user_db_dir: dirs::config_dir().unwrap_or_else(env::temp_dir).join("dconf"),
            system_db_dir: PathBuf::from(&sysconfdir).join("dconf/db"),
            sysconf_profile_dir: PathBuf::from(&sysconfdir).join("dconf/profile"),
            data_profile_dirs: data_dirs
                .split(':')
                .filter(|s| !s.is_empty())
                .map(|d| PathBuf::from(d).join("dconf/profile"))
                .collect(),
            runtime_dir,
        }
    }
}
