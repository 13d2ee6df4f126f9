//! The process-global engine list inbound bus signals are demultiplexed
//! against (§4.7.9). Every engine registers a weak reference to itself at
//! construction; the one [`SignalSink`] installed on every wire adapter
//! forwards each incoming signal to every still-alive registered engine.
//!
//! Dispatch takes a snapshot of live engines under the registry lock and
//! releases it before calling into any of them, so an engine's signal
//! handling never runs with the global lock held.

use std::sync::{Arc, Mutex, Weak};

use lazy_static::lazy_static;
use settings_wire::{BusKind, SignalBody, SignalSink};

use crate::engine::Engine;

struct Registry {
    engines: Mutex<Vec<Weak<Engine>>>,
}

lazy_static! {
    static ref REGISTRY: Registry = Registry { engines: Mutex::new(Vec::new()) };
    static ref GLOBAL_SINK: Arc<dyn SignalSink> = Arc::new(GlobalSink);
}

pub(crate) fn register(engine: &Arc<Engine>) {
    let mut engines = REGISTRY.engines.lock().unwrap();
    engines.retain(|w| w.strong_count() > 0);
    engines.push(Arc::downgrade(engine));
}

pub(crate) fn global_sink() -> Arc<dyn SignalSink> {
    GLOBAL_SINK.clone()
}

struct GlobalSink;

impl SignalSink for GlobalSink {
    fn dispatch(&self, bus: BusKind, sender: &str, object_path: &str, member: &str, body: SignalBody) {
        let snapshot: Vec<Arc<Engine>> = {
            let engines = REGISTRY.engines.lock().unwrap();
            engines.iter().filter_map(Weak::upgrade).collect()
        };
        for engine in snapshot {
            engine.handle_signal(bus, sender, object_path, member, &body);
        }
    }
}
