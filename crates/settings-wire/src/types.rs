use std::fmt;

/// Which D-Bus bus an [`Endpoint`] lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    Session,
    System,
}

/// The coordinates of one writer (or name-service) endpoint: which bus,
/// which well-known service name, and which object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub bus: BusKind,
    pub service: String,
    pub object_path: String,
}

impl Endpoint {
    pub fn new(bus: BusKind, service: impl Into<String>, object_path: impl Into<String>) -> Endpoint {
        Endpoint { bus, service: service.into(), object_path: object_path.into() }
    }
}

/// Method-call arguments. The writer's wire contract only ever needs a
/// serialized change-set blob (`Change`), a bare match-rule string
/// (`AddMatch`/`RemoveMatch`), or nothing (`Init`).
#[derive(Debug, Clone)]
pub enum Args {
    None,
    Str(String),
    Bytes(Vec<u8>),
}

/// Method-call replies. `Change` returns a tag string; everything else
/// returns nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    None,
    Str(String),
}

/// Errors a call can fail with. `NotWritable` is the one case the engine
/// surfaces to callers verbatim (§7); everything else collapses to
/// `Failed` for logging purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    NotWritable,
    Failed(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::NotWritable => write!(f, "not writable"),
            WireError::Failed(msg) => write!(f, "writer call failed: {}", msg),
        }
    }
}

impl std::error::Error for WireError {}

pub type CallResult = Result<Reply, WireError>;

/// The decoded body of an inbound signal, parsed by the transport from its
/// native wire form into the shapes the engine's signal handler expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalBody {
    Notify { prefix: String, changes: Vec<String>, tag: String },
    WritabilityNotify { path: String },
    /// A signal on a watched object path whose member this transport does
    /// not recognize; the engine's dispatcher drops these.
    Unknown,
}
