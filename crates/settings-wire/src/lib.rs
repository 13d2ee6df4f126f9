//! Pluggable transport for writer RPCs, match-rule (un)registration, and
//! inbound change signals (§4.8).
//!
//! [`WireAdapter`] is the seam the engine is built against. [`DbusAdapter`]
//! is the real transport, backed by `zbus`; [`mock::MockAdapter`] is an
//! in-process stand-in that records calls and lets a test script replies
//! and signals deterministically.

mod adapter;
mod dbus;
pub mod mock;
mod types;

pub use adapter::{SignalSink, WireAdapter};
pub use dbus::DbusAdapter;
pub use types::{Args, BusKind, CallResult, Endpoint, Reply, SignalBody, WireError};
