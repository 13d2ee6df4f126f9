use std::sync::Arc;

use crate::types::{Args, BusKind, CallResult, Endpoint};

/// Receives every inbound signal the transport observes, demultiplexed by
/// the engine's process-global handler (§4.7.9). A transport holds at most
/// one sink at a time; `set_signal_sink` is called once, at engine
/// construction.
pub trait SignalSink: Send + Sync {
    fn dispatch(&self, bus: BusKind, sender: &str, object_path: &str, member: &str, body: crate::types::SignalBody);
}

/// The RPC surface the engine is built against. Implementations must be
/// safe to call from any thread and must never invoke `on_reply` or a
/// `SignalSink` while holding any lock of their own.
pub trait WireAdapter: Send + Sync {
    /// Block the calling thread until a reply (or error) arrives.
    fn call_sync(
        &self,
        endpoint: &Endpoint,
        iface: &str,
        method: &str,
        args: Args,
    ) -> CallResult;

    /// Dispatch the call on a worker thread; `on_reply` runs there once a
    /// reply or error arrives. Never blocks the calling thread.
    fn call_async(
        &self,
        endpoint: &Endpoint,
        iface: &str,
        method: &str,
        args: Args,
        on_reply: Box<dyn FnOnce(CallResult) + Send>,
    );

    /// Register the sink that receives every inbound signal this
    /// transport observes, going forward.
    fn set_signal_sink(&self, sink: Arc<dyn SignalSink>);
}
