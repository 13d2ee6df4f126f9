//! An in-process transport for tests: records every call, lets a test
//! script replies and drive async completions at exactly the moments it
//! wants, and delivers signals on demand via `inject_signal`. No bus, no
//! threads -- the same split the ambient stack's real `DbusAdapter` makes,
//! traded for determinism instead of fidelity.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::{SignalSink, WireAdapter};
use crate::types::{Args, BusKind, CallResult, Endpoint, Reply, SignalBody, WireError};

/// One recorded call, sync or async.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub endpoint: Endpoint,
    pub iface: String,
    pub method: String,
    pub args: Args,
}

struct PendingCall {
    method: String,
    args: Args,
    on_reply: Box<dyn FnOnce(CallResult) + Send>,
}

struct Inner {
    sink: Option<Arc<dyn SignalSink>>,
    log: Vec<CallRecord>,
    pending: VecDeque<PendingCall>,
    scripted: HashMap<String, VecDeque<CallResult>>,
}

pub struct MockAdapter {
    inner: Mutex<Inner>,
    tag_counter: AtomicU64,
}

impl MockAdapter {
    pub fn new() -> Arc<MockAdapter> {
        Arc::new(MockAdapter {
            inner: Mutex::new(Inner {
                sink: None,
                log: Vec::new(),
                pending: VecDeque::new(),
                scripted: HashMap::new(),
            }),
            tag_counter: AtomicU64::new(1),
        })
    }

    /// Every call recorded so far, sync and async, in call order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.inner.lock().unwrap().log.iter().filter(|c| c.method == method).count()
    }

    pub fn pending_count(&self, method: &str) -> usize {
        self.inner.lock().unwrap().pending.iter().filter(|p| p.method == method).count()
    }

    /// The args of the oldest still-pending call for `method`, without
    /// completing it. Lets a caller inspect (e.g. decode) what a `Change`
    /// call would commit before deciding how to reply to it.
    pub fn peek_oldest_pending_args(&self, method: &str) -> Option<Args> {
        self.inner.lock().unwrap().pending.iter().find(|p| p.method == method).map(|p| p.args.clone())
    }

    /// Queue a scripted reply for the next `call_sync` with this method
    /// name (FIFO per method). Unscripted calls get [`default_reply`].
    pub fn script_reply(&self, method: &str, result: CallResult) {
        self.inner
            .lock()
            .unwrap()
            .scripted
            .entry(method.to_owned())
            .or_default()
            .push_back(result);
    }

    fn default_reply(&self, method: &str) -> CallResult {
        if method == "Change" {
            let n = self.tag_counter.fetch_add(1, Ordering::Relaxed);
            Ok(Reply::Str(format!("tag-{}", n)))
        } else {
            Ok(Reply::None)
        }
    }

    /// Complete the oldest still-pending async call for `method` with
    /// `result`. Returns `false` if there was none.
    pub fn complete_oldest_async(&self, method: &str, result: CallResult) -> bool {
        let call = {
            let mut inner = self.inner.lock().unwrap();
            let idx = inner.pending.iter().position(|p| p.method == method);
            match idx {
                Some(idx) => inner.pending.remove(idx),
                None => None,
            }
        };
        match call {
            Some(call) => {
                (call.on_reply)(result);
                true
            }
            None => false,
        }
    }

    /// Complete every still-pending async call for `method` with `result`,
    /// oldest first.
    pub fn complete_all_async(&self, method: &str, result: CallResult) -> usize {
        let mut n = 0;
        while self.complete_oldest_async(method, result.clone()) {
            n += 1;
        }
        n
    }

    /// Deliver a signal to the registered sink, as if it arrived over the
    /// wire. A no-op if no sink has been registered yet.
    pub fn inject_signal(
        &self,
        bus: BusKind,
        sender: &str,
        object_path: &str,
        member: &str,
        body: SignalBody,
    ) {
        let sink = self.inner.lock().unwrap().sink.clone();
        if let Some(sink) = sink {
            sink.dispatch(bus, sender, object_path, member, body);
        } else {
            log::warn!("mock adapter dropped a signal: no sink registered");
        }
    }

    fn record(&self, endpoint: &Endpoint, iface: &str, method: &str, args: &Args) {
        self.inner.lock().unwrap().log.push(CallRecord {
            endpoint: endpoint.clone(),
            iface: iface.to_owned(),
            method: method.to_owned(),
            args: args.clone(),
        });
    }
}

impl WireAdapter for MockAdapter {
    fn call_sync(&self, endpoint: &Endpoint, iface: &str, method: &str, args: Args) -> CallResult {
        self.record(endpoint, iface, method, &args);
        let scripted = self
            .inner
            .lock()
            .unwrap()
            .scripted
            .get_mut(method)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| self.default_reply(method))
    }

    fn call_async(
        &self,
        endpoint: &Endpoint,
        iface: &str,
        method: &str,
        args: Args,
        on_reply: Box<dyn FnOnce(CallResult) + Send>,
    ) {
        self.record(endpoint, iface, method, &args);
        self.inner
            .lock()
            .unwrap()
            .pending
            .push_back(PendingCall { method: method.to_owned(), args, on_reply });
    }

    fn set_signal_sink(&self, sink: Arc<dyn SignalSink>) {
        self.inner.lock().unwrap().sink = Some(sink);
    }
}
