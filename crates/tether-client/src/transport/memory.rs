//! In-process transport
//!
//! Nothing leaves the process: the caller plays the remote end by driving the
//! captured handles. Used by the test suite and the dispatch benchmark.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use uuid::Uuid;

use super::{
    CloseReason, ConnectRequest, EventSink, Transport, TransportError, TransportHandle,
};

#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    handles: Mutex<Vec<Arc<MemoryHandle>>>,
    refuse_open: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail with `message`, or succeed again with `None`
    pub fn refuse_open(&self, message: Option<&str>) {
        *lock(&self.inner.refuse_open) = message.map(str::to_owned);
    }

    /// All handles created so far, oldest first
    pub fn handles(&self) -> Vec<Arc<MemoryHandle>> {
        lock(&self.inner.handles).clone()
    }

    pub fn last_handle(&self) -> Option<Arc<MemoryHandle>> {
        lock(&self.inner.handles).last().cloned()
    }

    pub fn opened(&self) -> usize {
        lock(&self.inner.handles).len()
    }

    /// Handles the client has not told to disconnect
    pub fn live_handles(&self) -> usize {
        lock(&self.inner.handles)
            .iter()
            .filter(|handle| !handle.is_closed_by_client())
            .count()
    }
}

impl Transport for MemoryTransport {
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        if let Some(message) = lock(&self.inner.refuse_open).clone() {
            return Err(TransportError::Open(message));
        }

        let handle = Arc::new(MemoryHandle {
            id: Uuid::new_v4().to_string(),
            request,
            sink: events,
            connected: AtomicBool::new(false),
            closed_by_client: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            emitted: Mutex::new(Vec::new()),
        });
        lock(&self.inner.handles).push(handle.clone());

        Ok(handle)
    }
}

/// One simulated connection
pub struct MemoryHandle {
    id: String,
    request: ConnectRequest,
    sink: EventSink,
    connected: AtomicBool,
    closed_by_client: AtomicBool,
    connect_calls: AtomicUsize,
    emitted: Mutex<Vec<(String, Value)>>,
}

impl MemoryHandle {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Complete the handshake
    pub fn accept(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.sink.connected();
    }

    pub fn fail(&self, message: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.connect_error(message);
    }

    /// Close from the remote side
    pub fn close(&self, reason: CloseReason) {
        self.connected.store(false, Ordering::SeqCst);
        self.sink.disconnected(reason);
    }

    pub fn reject_auth(&self, detail: &str) {
        self.sink.auth_rejected(detail);
    }

    /// Deliver an inbound event as if it came off the wire
    pub fn receive(&self, event: &str, args: Vec<Value>) {
        self.sink.dispatch(event, args);
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        lock(&self.emitted).clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

impl TransportHandle for MemoryHandle {
    fn connect(&self) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        lock(&self.emitted).push((event.to_owned(), payload));
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed_by_client.store(true, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}
