//! WebSocket transport
//!
//! Frames are JSON arrays (see [`EventFrame`]). The credential travels twice:
//! as an `Authorization` header on the upgrade request and in an `auth` frame
//! sent right after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid;

use super::frame::EventFrame;
use super::{
    CloseReason, ConnectRequest, EVENT_AUTH_ERROR, EventSink, Transport, TransportError,
    TransportHandle,
};

/// Name of the handshake frame carrying the credential
pub const AUTH_EVENT: &str = "auth";

#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    runtime: Option<Handle>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run connections on `runtime` instead of the caller's runtime
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }
}

impl Transport for WsTransport {
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current()
                .map_err(|e| TransportError::Open(format!("no tokio runtime: {e}")))?,
        };
        // fail before any I/O if the request can never be sent
        build_request(&request)?;

        Ok(Arc::new(WsHandle {
            id: Uuid::new_v4().to_string(),
            request,
            sink: events,
            runtime,
            connected: Arc::new(AtomicBool::new(false)),
            commands: Mutex::new(None),
        }))
    }
}

enum Command {
    Frame(String),
    Close,
}

pub struct WsHandle {
    id: String,
    request: ConnectRequest,
    sink: EventSink,
    runtime: Handle,
    connected: Arc<AtomicBool>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl WsHandle {
    fn commands(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Command>>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportHandle for WsHandle {
    fn connect(&self) {
        let mut commands = self.commands();
        if commands.is_some() {
            log::warn!("Connection {} already started", self.id);
            return;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        *commands = Some(sender);
        drop(commands);

        self.runtime.spawn(run_connection(
            self.request.clone(),
            self.sink.clone(),
            self.connected.clone(),
            receiver,
        ));
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let text = EventFrame::new(event, vec![payload])
            .encode()
            .map_err(|e| TransportError::Emit(e.to_string()))?;

        match self.commands().as_ref() {
            Some(sender) => sender
                .send(Command::Frame(text))
                .map_err(|_closed| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(sender) = self.commands().take() {
            // the task may already be gone
            sender.send(Command::Close).ok();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// Map an `http(s)` URL onto `ws(s)`; other schemes pass through
pub fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_owned()
    }
}

fn build_request(request: &ConnectRequest) -> Result<Request, TransportError> {
    let mut ws_request = websocket_url(&request.url)
        .into_client_request()
        .map_err(|e| TransportError::Open(e.to_string()))?;

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Open(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Open(format!("invalid value for header {name}: {e}")))?;
        ws_request.headers_mut().insert(name, value);
    }

    Ok(ws_request)
}

async fn run_connection(
    request: ConnectRequest,
    sink: EventSink,
    connected: Arc<AtomicBool>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let ws_request = match build_request(&request) {
        Ok(ws_request) => ws_request,
        Err(e) => {
            sink.connect_error(e.to_string());
            return;
        }
    };

    let connecting = tokio::time::timeout(request.connect_timeout, connect_async(ws_request));
    let stream = tokio::select! {
        result = connecting => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                sink.connect_error(e.to_string());
                return;
            }
            Err(_elapsed) => {
                sink.connect_error("timeout");
                return;
            }
        },
        _ = commands.recv() => {
            log::debug!("Connect to {} cancelled", request.url);
            return;
        }
    };

    let (mut writer, mut reader) = stream.split();

    let auth = match serde_json::to_value(&request.auth) {
        Ok(auth) => EventFrame::new(AUTH_EVENT, vec![auth]).encode(),
        Err(e) => {
            sink.connect_error(e.to_string());
            return;
        }
    };
    let handshake = match auth {
        Ok(text) => writer.send(Message::Text(text)).await,
        Err(e) => {
            sink.connect_error(e.to_string());
            return;
        }
    };
    if let Err(e) = handshake {
        sink.connect_error(e.to_string());
        return;
    }

    connected.store(true, Ordering::SeqCst);
    sink.connected();

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Frame(text)) => {
                    if let Err(e) = writer.send(Message::Text(text)).await {
                        log::warn!("Failed to send frame: {e}");
                        break CloseReason::TransportClose;
                    }
                }
                Some(Command::Close) | None => {
                    connected.store(false, Ordering::SeqCst);
                    if let Err(e) = writer.send(Message::Close(None)).await {
                        log::debug!("Close frame not sent: {e}");
                    }
                    return;
                }
            },
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => match EventFrame::decode(&text) {
                    Ok(frame) if frame.name == EVENT_AUTH_ERROR => {
                        sink.dispatch(&frame.name, frame.args);
                    }
                    Ok(frame) => sink.event(frame.name, frame.args),
                    Err(e) => log::warn!("Dropping malformed frame: {e}"),
                },
                Some(Ok(Message::Close(_))) => break CloseReason::ServerDisconnect,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {e}");
                    break CloseReason::TransportClose;
                }
                None => break CloseReason::TransportClose,
            },
        }
    };

    connected.store(false, Ordering::SeqCst);
    sink.disconnected(reason);
}
