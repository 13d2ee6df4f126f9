//! Subscription reference counting and race-free watch establishment
//! (§4.7.8).
//!
//! A path's subscription count lives in exactly one of two maps:
//! `establishing` while its first `AddMatch` is outstanding, `active` once
//! every source has acked. Further `watch_fast` calls against the same
//! path before the ack just bump whichever map currently holds it; only
//! the very first call for a path sends any RPC at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use settings_wire::{Args, BusKind, Endpoint};

use crate::engine::Engine;
use crate::notify::ChangeNotification;
use crate::Result;

#[derive(Default)]
pub(crate) struct SubsInner {
    pub(crate) establishing: HashMap<String, u32>,
    pub(crate) active: HashMap<String, u32>,
}

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_IFACE: &str = "org.freedesktop.DBus";

fn bus_daemon(bus: BusKind) -> Endpoint {
    Endpoint::new(bus, DBUS_NAME, DBUS_PATH)
}

fn match_rule(object_path: &str, path: &str) -> String {
    format!("type='signal',interface='Writer',path='{}',arg0path='{}'", object_path, path)
}

impl Engine {
    /// Subscribe without blocking (§4.7.8).
    ///
    /// The first subscription for `path` sends one `AddMatch` per source
    /// with an RPC endpoint and returns immediately; further calls before
    /// the acks land just bump the establishing count. Once every ack is
    /// in, the engine compares its current state against the state
    /// captured when the first call was made -- if anything changed in
    /// between, a change is not lost to the race: a catch-up notification
    /// for `path` is synthesized.
    pub fn watch_fast(self: &Arc<Engine>, path: &str) {
        let first = {
            let mut subs = self.subs.lock().unwrap();
            if let Some(count) = subs.active.get_mut(path) {
                *count += 1;
                false
            } else {
                let count = subs.establishing.entry(path.to_owned()).or_insert(0);
                *count += 1;
                *count == 1
            }
        };
        if !first {
            return;
        }

        let captured_state = self.current_state();
        let path = path.to_owned();
        let endpoints: Vec<Endpoint> = self.descriptors.iter().filter_map(|d| d.endpoint.clone()).collect();

        if endpoints.is_empty() {
            self.finish_watch_establish(&path, captured_state);
            return;
        }

        let outstanding = Arc::new(AtomicUsize::new(endpoints.len()));
        for endpoint in endpoints {
            let engine = Arc::clone(self);
            let path = path.clone();
            let outstanding = Arc::clone(&outstanding);
            let rule = match_rule(&endpoint.object_path, &path);
            self.wire.call_async(
                &bus_daemon(endpoint.bus),
                DBUS_IFACE,
                "AddMatch",
                Args::Str(rule),
                Box::new(move |_result| {
                    if outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                        engine.finish_watch_establish(&path, captured_state);
                    }
                }),
            );
        }
    }

    fn finish_watch_establish(self: &Arc<Engine>, path: &str, captured_state: u64) {
        {
            let mut subs = self.subs.lock().unwrap();
            if let Some(count) = subs.establishing.remove(path) {
                *subs.active.entry(path.to_owned()).or_insert(0) += count;
            }
        }
        if self.current_state() != captured_state {
            self.notify_listener(ChangeNotification {
                prefix: path.to_owned(),
                changes: vec![String::new()],
                tag: None,
                origin_tag: None,
                is_writability: false,
            });
        }
    }

    /// Unsubscribe without blocking (§4.7.8).
    ///
    /// Panics if `path` has no outstanding subscription: decrementing an
    /// empty count is a caller bug, not a recoverable condition. Sends one
    /// `RemoveMatch` per source once the last subscription for `path`
    /// (active or still establishing) drops.
    pub fn unwatch_fast(self: &Arc<Engine>, path: &str) {
        let send_remove = {
            let mut subs = self.subs.lock().unwrap();
            let hit = if let Some(count) = subs.active.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    subs.active.remove(path);
                }
                true
            } else if let Some(count) = subs.establishing.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    subs.establishing.remove(path);
                }
                true
            } else {
                false
            };
            assert!(hit, "unwatch_fast called with no outstanding subscription for {:?}", path);
            !subs.active.contains_key(path) && !subs.establishing.contains_key(path)
        };
        if send_remove {
            for endpoint in self.descriptors.iter().filter_map(|d| d.endpoint.clone()) {
                let rule = match_rule(&endpoint.object_path, path);
                self.wire
                    .call_async(&bus_daemon(endpoint.bus), DBUS_IFACE, "RemoveMatch", Args::Str(rule), Box::new(|_| {}));
            }
        }
    }

    /// Subscribe, blocking until every source's `AddMatch` is acked
    /// (§4.7.8). No establishing phase: the active count is bumped
    /// immediately, and the RPC is sent only on the 0-to-1 transition.
    pub fn watch_sync(&self, path: &str) -> Result<()> {
        let first = {
            let mut subs = self.subs.lock().unwrap();
            let count = subs.active.entry(path.to_owned()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            for endpoint in self.descriptors.iter().filter_map(|d| d.endpoint.clone()) {
                let rule = match_rule(&endpoint.object_path, path);
                self.wire.call_sync(&bus_daemon(endpoint.bus), DBUS_IFACE, "AddMatch", Args::Str(rule))?;
            }
        }
        Ok(())
    }

    /// Unsubscribe, blocking until every source's `RemoveMatch` is acked
    /// on the 1-to-0 transition.
    pub fn unwatch_sync(&self, path: &str) -> Result<()> {
        let last = {
            let mut subs = self.subs.lock().unwrap();
            let count = subs
                .active
                .get_mut(path)
                .unwrap_or_else(|| panic!("unwatch_sync called with no outstanding subscription for {:?}", path));
            *count -= 1;
            let last = *count == 0;
            if last {
                subs.active.remove(path);
            }
            last
        };
        if last {
            for endpoint in self.descriptors.iter().filter_map(|d| d.endpoint.clone()) {
                let rule = match_rule(&endpoint.object_path, path);
                self.wire.call_sync(&bus_daemon(endpoint.bus), DBUS_IFACE, "RemoveMatch", Args::Str(rule))?;
            }
        }
        Ok(())
    }
}
