//! Optimistic writes, the pending/in-flight queue, and the synchronous
//! write path (§4.7.6, §4.7.7).

use std::sync::{Arc, MutexGuard};

use settings_changeset::ChangeSet;
use settings_wire::{Args, CallResult, Reply};

use crate::engine::{Engine, QueueInner};
use crate::error::{Error, Result};
use crate::notify::ChangeNotification;
use crate::ReadFlags;

impl Engine {
    /// Submit `delta` without blocking on the writer (§4.7.6).
    ///
    /// Fails with [`Error::NotWritable`] if any non-reset entry targets a
    /// key that is not currently writable -- resets always succeed
    /// locally, even against a locked or non-writable key. Otherwise the
    /// delta is queued (coalescing with any already-pending delta) and a
    /// synchronous `Change` RPC is kicked off if none is already in
    /// flight; the call returns once the delta is queued, not once the
    /// writer has replied. Unless the whole delta turned out to be
    /// redundant against the current view, a change notification makes
    /// the optimistic value visible to this process's own subscribers
    /// immediately.
    pub fn change_fast(self: &Arc<Engine>, mut delta: ChangeSet, origin_tag: Option<String>) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        let mut redundant = true;
        let mut violation: Option<Error> = None;
        delta.all(|path, value| {
            match value {
                None if path.ends_with('/') => {
                    if self.dir_has_contents(path) {
                        redundant = false;
                    }
                }
                None => {
                    let current = self
                        .read(ReadFlags::USER_VALUE, &[], path)
                        .expect("change-set entries carry already-validated key paths");
                    if current.is_some() {
                        redundant = false;
                    }
                }
                Some(v) => {
                    let current = self
                        .read(ReadFlags::USER_VALUE, &[], path)
                        .expect("change-set entries carry already-validated key paths");
                    if current.as_ref() != Some(v) {
                        redundant = false;
                    }
                    if !self
                        .is_writable(path)
                        .expect("change-set entries carry already-validated key paths")
                    {
                        violation = Some(Error::NotWritable);
                        return false;
                    }
                }
            }
            true
        });
        if let Some(e) = violation {
            return Err(e);
        }

        delta.seal();

        {
            let mut q = self.queue.lock().unwrap();
            if q.pending.is_none() {
                q.pending = Some(ChangeSet::new());
            }
            q.pending.as_mut().unwrap().apply(&delta);
            self.manage_queue(&mut q);
        }

        if !redundant {
            self.synthesize(&delta, None, origin_tag);
        }

        Ok(())
    }

    /// Submit `delta`, blocking until the writer replies (§4.7.7). Bypasses
    /// the pending/in-flight queue entirely -- no redundancy check, no
    /// coalescing, no synthesized notification (the writer's own `Notify`
    /// signal, once it arrives, carries that).
    pub fn change_sync(&self, mut delta: ChangeSet) -> Result<String> {
        if delta.is_empty() {
            return Ok(String::new());
        }

        let mut violation: Option<Error> = None;
        delta.all(|path, value| {
            if value.is_some()
                && !self
                    .is_writable(path)
                    .expect("change-set entries carry already-validated key paths")
            {
                violation = Some(Error::NotWritable);
                return false;
            }
            true
        });
        if let Some(e) = violation {
            return Err(e);
        }

        delta.seal();
        let endpoint = self.source0_endpoint().expect("change_sync requires a writable source 0");
        let bytes = delta.serialize();
        match self
            .wire
            .call_sync(&endpoint, settings_source::WRITER_IFACE_NAME, "Change", Args::Bytes(bytes))?
        {
            Reply::Str(tag) => Ok(tag),
            Reply::None => Ok(String::new()),
        }
    }

    /// Promote a pending delta to in-flight if nothing is already in
    /// flight; called with the queue lock already held, both right after
    /// a `change_fast` submission and from the `Change` completion
    /// handler. Wakes [`Engine::sync`] waiters once nothing is in flight.
    pub(crate) fn manage_queue(self: &Arc<Engine>, q: &mut MutexGuard<'_, QueueInner>) {
        if q.pending.is_some() && q.in_flight.is_none() {
            let mut payload = q.pending.take().unwrap();
            payload.seal();
            let bytes = payload.serialize();
            q.in_flight = Some(payload);

            let endpoint = self
                .source0_endpoint()
                .expect("a pending write implies a writable source 0 with an endpoint");
            let engine = Arc::clone(self);
            self.wire.call_async(
                &endpoint,
                settings_source::WRITER_IFACE_NAME,
                "Change",
                Args::Bytes(bytes),
                Box::new(move |result| engine.on_change_reply(result)),
            );
        }
        if q.in_flight.is_none() {
            self.queue_cond.notify_all();
        }
    }

    fn on_change_reply(self: &Arc<Engine>, result: CallResult) {
        let dropped = {
            let mut q = self.queue.lock().unwrap();
            let in_flight = q.in_flight.take();
            let dropped = match result {
                Ok(Reply::Str(tag)) => {
                    q.last_handled = Some(tag);
                    None
                }
                Ok(Reply::None) => {
                    q.last_handled = Some(String::new());
                    None
                }
                Err(e) => {
                    log::warn!("settings write failed, rolling back the optimistic value: {}", e);
                    in_flight
                }
            };
            self.manage_queue(&mut q);
            dropped
        };
        if let Some(cs) = dropped {
            self.synthesize(&cs, None, None);
        }
    }

    pub(crate) fn synthesize(&self, cs: &ChangeSet, tag: Option<String>, origin_tag: Option<String>) {
        let (prefix, suffixes, _values) = cs.sealed_parts();
        self.notify_listener(ChangeNotification {
            prefix: prefix.to_owned(),
            changes: suffixes.to_vec(),
            tag,
            origin_tag,
            is_writability: false,
        });
    }

    fn dir_has_contents(&self, dir: &str) -> bool {
        let from_source0 = {
            let dynamic = self.acquire_sources();
            dynamic
                .states
                .first()
                .and_then(|s| s.values())
                .map(|g| !g.list(dir).is_empty())
                .unwrap_or(false)
        };
        if from_source0 {
            return true;
        }
        let q = self.queue.lock().unwrap();
        q.pending.as_ref().map(|p| p.any_key_under(dir)).unwrap_or(false)
            || q.in_flight.as_ref().map(|p| p.any_key_under(dir)).unwrap_or(false)
    }
}
