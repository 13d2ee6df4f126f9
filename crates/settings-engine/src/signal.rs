//! Inbound signal handling (§4.7.9), invoked by the process-global
//! registry ([`crate::registry`]) for every registered engine whenever the
//! wire layer observes a `Notify` or `WritabilityNotify` signal.

use settings_wire::{BusKind, SignalBody};

use crate::engine::Engine;
use crate::notify::ChangeNotification;

impl Engine {
    pub(crate) fn handle_signal(&self, bus: BusKind, _sender: &str, object_path: &str, _member: &str, body: &SignalBody) {
        match body {
            SignalBody::Notify { prefix, changes, tag } => self.handle_notify(bus, object_path, prefix, changes, tag),
            SignalBody::WritabilityNotify { path } => self.handle_writability_notify(path),
            SignalBody::Unknown => {}
        }
    }

    /// Reject junk before dispatch: `changes` must be non-empty and shaped
    /// for `prefix` (a single `""` entry for a key, relative paths for a
    /// dir). Echo suppression: a signal whose tag matches this engine's
    /// own `last_handled` came from a write this engine itself just made
    /// and already has a synthesized notification for -- drop it.
    /// Finally, the signal must actually originate from one of this
    /// engine's own sources.
    fn handle_notify(&self, bus: BusKind, object_path: &str, prefix: &str, changes: &[String], tag: &str) {
        if changes.is_empty() {
            return;
        }
        if settings_path::is_key(prefix) {
            if changes != [String::new()] {
                return;
            }
        } else if settings_path::is_dir(prefix) {
            if !changes.iter().all(|c| settings_path::is_rel_path(c)) {
                return;
            }
        } else {
            return;
        }

        let last_handled = self.queue.lock().unwrap().last_handled.clone();
        if last_handled.as_deref() == Some(tag) {
            return;
        }

        let matches_source = self
            .descriptors
            .iter()
            .any(|d| d.endpoint.as_ref().map(|e| e.bus == bus && e.object_path == object_path).unwrap_or(false));
        if !matches_source {
            return;
        }

        self.notify_listener(ChangeNotification {
            prefix: prefix.to_owned(),
            changes: changes.to_vec(),
            tag: Some(tag.to_owned()),
            origin_tag: None,
            is_writability: false,
        });
    }

    fn handle_writability_notify(&self, path: &str) {
        if !settings_path::is_path(path) {
            return;
        }
        self.notify_listener(ChangeNotification {
            prefix: path.to_owned(),
            changes: vec![String::new()],
            tag: Some(String::new()),
            origin_tag: None,
            is_writability: true,
        });
    }
}
