//! The client-side engine (§4.7): a composed read view over a layered
//! stack of sources, an optimistic two-stage write queue, race-free
//! subscription management, and inbound signal dispatch.
//!
//! An [`Engine`] is constructed once per profile via [`Engine::new`] and
//! shared behind an `Arc`; its synchronous methods (`read`, `list`,
//! `is_writable`, `list_locks`, `change_sync`, `watch_sync`,
//! `unwatch_sync`, `sync`) never need the `Arc`, while the asynchronous
//! ones (`change_fast`, `watch_fast`, `unwatch_fast`) take `self: &Arc<Self>`
//! because they keep the engine alive across a wire callback.

mod config;
mod engine;
mod error;
mod notify;
mod registry;
mod signal;
mod watch;
mod write;

pub use config::EngineConfig;
pub use engine::{Engine, ReadFlags};
pub use error::{Error, Result};
pub use notify::{ChangeListener, ChangeNotification};

#[cfg(test)]
mod tests;
