use std::path::PathBuf;

use settings_wire::{BusKind, Endpoint};

use crate::paths::PathConfig;

/// Which layer a source occupies. `ConfinedProxy` is part of the data
/// model for completeness but is never produced by [`crate::descriptor::SourceDescriptor::parse`]
/// -- the confinement proxy that would construct one is out of scope
/// (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    User,
    UserNfsProxied,
    System,
    File,
    Service,
    ConfinedProxy,
}

impl Kind {
    /// Writable sources are exactly the user and service kinds (§4.5).
    pub fn is_writable(self) -> bool {
        matches!(self, Kind::User | Kind::UserNfsProxied | Kind::Service)
    }
}

const WRITER_SERVICE: &str = "org.settingsd.Writer";
const WRITER_IFACE: &str = "org.settingsd.Writer1";

/// The immutable, lock-free attributes of one database layer: kind, name,
/// writability, on-disk path, and (for kinds with one) RPC endpoint
/// coordinates.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub kind: Kind,
    pub name: String,
    pub writable: bool,
    pub db_path: PathBuf,
    pub endpoint: Option<Endpoint>,
}

pub const WRITER_IFACE_NAME: &str = WRITER_IFACE;

impl SourceDescriptor {
    /// Parse one profile line (`user-db:NAME`, `system-db:NAME`,
    /// `file-db:ABSOLUTE-PATH`, `service-db:BUS/NAME`, `user-db-nfs:NAME`).
    /// Unknown prefixes return `None`; the caller logs and skips.
    pub fn parse(line: &str, paths: &PathConfig) -> Option<SourceDescriptor> {
        let (prefix, rest) = line.split_once(':')?;
        match prefix {
            "user-db" => Some(Self::user(rest, paths, Kind::User)),
            "user-db-nfs" => Some(Self::user(rest, paths, Kind::UserNfsProxied)),
            "system-db" => Some(Self::system(rest, paths)),
            "file-db" => Some(Self::file(rest)),
            "service-db" => Self::service(rest, paths),
            _ => None,
        }
    }

    fn user(name: &str, paths: &PathConfig, kind: Kind) -> SourceDescriptor {
        SourceDescriptor {
            kind,
            name: name.to_owned(),
            writable: kind.is_writable(),
            db_path: paths.user_db_dir.join(name),
            endpoint: Some(writer_endpoint(BusKind::Session, name)),
        }
    }

    fn system(name: &str, paths: &PathConfig) -> SourceDescriptor {
        SourceDescriptor {
            kind: Kind::System,
            name: name.to_owned(),
            writable: false,
            db_path: paths.system_db_dir.join(name),
            endpoint: None,
        }
    }

    fn file(path: &str) -> SourceDescriptor {
        let db_path = PathBuf::from(path);
        let name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_owned());
        SourceDescriptor { kind: Kind::File, name, writable: false, db_path, endpoint: None }
    }

    fn service(rest: &str, paths: &PathConfig) -> Option<SourceDescriptor> {
        let (bus, name) = rest.split_once('/')?;
        let bus = match bus {
            "session" => BusKind::Session,
            "system" => BusKind::System,
            _ => return None,
        };
        Some(SourceDescriptor {
            kind: Kind::Service,
            name: name.to_owned(),
            writable: true,
            db_path: paths.user_db_dir.join(name),
            endpoint: Some(writer_endpoint(bus, name)),
        })
    }
}

fn writer_endpoint(bus: BusKind, name: &str) -> Endpoint {
    Endpoint::new(bus, WRITER_SERVICE, format!("/org/settingsd/Writer/{}", name))
}
