//! The real transport, backed by `zbus`. A dedicated worker thread carries
//! every async call and the inbound signal loop, so the calling thread
//! never blocks and application locks are never held while invoking a
//! callback (§4.8).

use std::sync::{Arc, Mutex};
use std::thread;

use zbus::blocking::{Connection, MessageIterator};
use zbus::Message;

use crate::adapter::{SignalSink, WireAdapter};
use crate::types::{Args, BusKind, CallResult, Endpoint, Reply, SignalBody, WireError};

struct Connections {
    session: Mutex<Option<Connection>>,
    system: Mutex<Option<Connection>>,
}

impl Connections {
    fn new() -> Connections {
        Connections { session: Mutex::new(None), system: Mutex::new(None) }
    }

    fn get(&self, bus: BusKind) -> Result<Connection, WireError> {
        let slot = match bus {
            BusKind::Session => &self.session,
            BusKind::System => &self.system,
        };
        let mut guard = slot.lock().unwrap();
        if let Some(conn) = &*guard {
            return Ok(conn.clone());
        }
        let conn = match bus {
            BusKind::Session => Connection::session(),
            BusKind::System => Connection::system(),
        }
        .map_err(|e| WireError::Failed(format!("connecting to bus: {}", e)))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

/// Connects to the session and/or system bus on demand and issues calls
/// against the writer's well-known object paths.
pub struct DbusAdapter {
    connections: Arc<Connections>,
    sink: Arc<Mutex<Option<Arc<dyn SignalSink>>>>,
    worker: crossbeam_channel::Sender<Job>,
}

type Job = Box<dyn FnOnce() + Send>;

impl DbusAdapter {
    pub fn new() -> DbusAdapter {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        thread::Builder::new()
            .name("settings-wire-worker".to_owned())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .expect("spawning the wire worker thread");

        DbusAdapter {
            connections: Arc::new(Connections::new()),
            sink: Arc::new(Mutex::new(None)),
            worker: tx,
        }
    }

    /// Start the signal-receive loop for `bus`, forwarding every inbound
    /// signal to whatever sink is registered at the time it arrives.
    pub fn start_signal_loop(&self, bus: BusKind) -> Result<(), WireError> {
        let conn = self.connections.get(bus)?;
        let sink = Arc::clone(&self.sink);
        thread::Builder::new()
            .name("settings-wire-signals".to_owned())
            .spawn(move || {
                let iter = MessageIterator::from(conn);
                for msg in iter.flatten() {
                    dispatch_if_signal(bus, &msg, &sink);
                }
            })
            .map_err(|e| WireError::Failed(format!("spawning signal loop: {}", e)))?;
        Ok(())
    }

    fn call(endpoint: &Endpoint, conn: &Connection, iface: &str, method: &str, args: Args) -> CallResult {
        let proxy = zbus::blocking::Proxy::new(conn, endpoint.service.as_str(), endpoint.object_path.as_str(), iface)
            .map_err(|e| WireError::Failed(format!("building proxy: {}", e)))?;

        let raw: Result<Message, zbus::Error> = match args {
            Args::None => proxy.call_method(method, &()),
            Args::Str(s) => proxy.call_method(method, &(s,)),
            Args::Bytes(b) => proxy.call_method(method, &(b,)),
        };

        let msg = raw.map_err(|e| classify(method, e))?;
        decode_reply(method, &msg)
    }
}

fn classify(method: &str, e: zbus::Error) -> WireError {
    let text = e.to_string();
    if method == "Change" && text.to_lowercase().contains("not writable") {
        WireError::NotWritable
    } else {
        WireError::Failed(text)
    }
}

fn decode_reply(method: &str, msg: &Message) -> CallResult {
    if method == "Change" {
        let tag: String = msg
            .body()
            .map_err(|e| WireError::Failed(format!("decoding reply: {}", e)))?;
        Ok(Reply::Str(tag))
    } else {
        Ok(Reply::None)
    }
}

fn dispatch_if_signal(bus: BusKind, msg: &Message, sink: &Arc<Mutex<Option<Arc<dyn SignalSink>>>>) {
    let header = match msg.header() {
        Ok(h) => h,
        Err(_) => return,
    };
    if header.message_type().ok() != Some(zbus::MessageType::Signal) {
        return;
    }
    let member = match header.member() {
        Ok(Some(m)) => m.to_string(),
        _ => return,
    };
    let path = match header.path() {
        Ok(Some(p)) => p.to_string(),
        _ => return,
    };
    let sender = header.sender().ok().flatten().map(|s| s.to_string()).unwrap_or_default();

    let body = match member.as_str() {
        "Notify" => match msg.body::<(String, Vec<String>, String)>() {
            Ok((prefix, changes, tag)) => SignalBody::Notify { prefix, changes, tag },
            Err(_) => SignalBody::Unknown,
        },
        "WritabilityNotify" => match msg.body::<(String,)>() {
            Ok((path,)) => SignalBody::WritabilityNotify { path },
            Err(_) => SignalBody::Unknown,
        },
        _ => SignalBody::Unknown,
    };

    if let Some(sink) = sink.lock().unwrap().clone() {
        sink.dispatch(bus, &sender, &path, &member, body);
    }
}

impl WireAdapter for DbusAdapter {
    fn call_sync(&self, endpoint: &Endpoint, iface: &str, method: &str, args: Args) -> CallResult {
        let conn = self.connections.get(endpoint.bus)?;
        DbusAdapter::call(endpoint, &conn, iface, method, args)
    }

    fn call_async(
        &self,
        endpoint: &Endpoint,
        iface: &str,
        method: &str,
        args: Args,
        on_reply: Box<dyn FnOnce(CallResult) + Send>,
    ) {
        let connections = Arc::clone(&self.connections);
        let endpoint = endpoint.clone();
        let iface = iface.to_owned();
        let method = method.to_owned();
        let _ = self.worker.send(Box::new(move || {
            let result = connections
                .get(endpoint.bus)
                .and_then(|conn| DbusAdapter::call(&endpoint, &conn, &iface, &method, args));
            on_reply(result);
        }));
    }

    fn set_signal_sink(&self, sink: Arc<dyn SignalSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

impl Default for DbusAdapter {
    fn default() -> DbusAdapter {
        DbusAdapter::new()
    }
}
