//! Transport boundary
//!
//! The session manager never speaks a wire protocol itself. It asks a
//! [`Transport`] for a handle, wires an [`EventSink`] into it and reacts to the
//! lifecycle events the handle reports back.

pub mod frame;
pub mod memory;
#[cfg(feature = "websocket")]
pub mod ws;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

pub use memory::MemoryTransport;
#[cfg(feature = "websocket")]
pub use ws::WsTransport;

/// Wire names of the lifecycle events a transport emits
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_CONNECT_ERROR: &str = "connect_error";
pub const EVENT_DISCONNECT: &str = "disconnect";
pub const EVENT_AUTH_ERROR: &str = "auth_error";

/// Creates transport handles. One call per connection attempt.
pub trait Transport: Send + Sync + 'static {
    /// Create a handle for `request` that reports into `events`.
    ///
    /// Creating a handle must not start any I/O; the session manager calls
    /// [`TransportHandle::connect`] once the handle is installed.
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}

/// A single connection negotiated with the remote endpoint
pub trait TransportHandle: Send + Sync {
    /// Start connecting. Must return without delivering events synchronously.
    fn connect(&self);

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    fn disconnect(&self);

    /// Whether the underlying link is currently up
    fn is_connected(&self) -> bool;

    /// Identifier assigned by the remote end, when the protocol has one
    fn id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to create connection: {0}")]
    Open(String),

    #[error("Failed to send message: {0}")]
    Emit(String),

    #[error("Connection closed")]
    Closed,
}

/// Credential carried in the handshake payload
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct AuthOptions {
    pub token: String,
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .finish()
    }
}

/// Everything a transport needs to open one connection
#[derive(Clone)]
pub struct ConnectRequest {
    /// Base URL joined with the namespace
    pub url: String,
    pub auth: AuthOptions,
    /// Extra handshake headers, including `Authorization`
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    /// Always open a fresh connection instead of multiplexing an existing one
    pub force_new: bool,
    /// Whether the transport may reconnect on its own. The session manager
    /// owns retries, so this is always `false`.
    pub reconnection: bool,
}

impl ConnectRequest {
    pub fn new(url: String, token: &str, client_type: &str, connect_timeout: Duration) -> Self {
        Self {
            url,
            auth: AuthOptions {
                token: token.to_owned(),
            },
            headers: vec![
                ("Authorization".to_owned(), format!("Bearer {token}")),
                ("X-Client-Type".to_owned(), client_type.to_owned()),
            ],
            connect_timeout,
            force_new: true,
            reconnection: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("auth", &self.auth)
            .field("headers", &header_names)
            .field("connect_timeout", &self.connect_timeout)
            .field("force_new", &self.force_new)
            .field("reconnection", &self.reconnection)
            .finish()
    }
}

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server forcibly closed the session
    ServerDisconnect,
    /// The underlying channel went away
    TransportClose,
    /// The client asked for the close
    ClientDisconnect,
    PingTimeout,
    TransportError,
    ParseError,
    Other(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerDisconnect => "io server disconnect",
            Self::TransportClose => "transport close",
            Self::ClientDisconnect => "io client disconnect",
            Self::PingTimeout => "ping timeout",
            Self::TransportError => "transport error",
            Self::ParseError => "parse error",
            Self::Other(reason) => reason,
        }
    }

    /// Closes that were neither requested by this client nor protocol
    /// failures. Only these qualify for an automatic reconnect.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::ServerDisconnect | Self::TransportClose)
    }
}

impl From<&str> for CloseReason {
    fn from(reason: &str) -> Self {
        match reason {
            "io server disconnect" => Self::ServerDisconnect,
            "transport close" => Self::TransportClose,
            "io client disconnect" => Self::ClientDisconnect,
            "ping timeout" => Self::PingTimeout,
            "transport error" => Self::TransportError,
            "parse error" => Self::ParseError,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event reported by a transport handle
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    ConnectError(String),
    Disconnected(CloseReason),
    AuthRejected(String),
    Message { event: String, args: Vec<Value> },
}

impl TransportEvent {
    /// Classify a named event as it arrives off the wire
    pub fn from_wire(name: &str, args: Vec<Value>) -> Self {
        match name {
            EVENT_CONNECT => Self::Connected,
            EVENT_CONNECT_ERROR => Self::ConnectError(error_message(args.first())),
            EVENT_DISCONNECT => {
                let reason = args.first().and_then(Value::as_str).unwrap_or("transport close");
                Self::Disconnected(CloseReason::from(reason))
            }
            EVENT_AUTH_ERROR => Self::AuthRejected(detail_text(args.first())),
            _ => Self::Message {
                event: name.to_owned(),
                args,
            },
        }
    }
}

/// Prefer `message` of an error object, fall back to the raw text
fn error_message(value: Option<&Value>) -> String {
    match value {
        Some(Value::Object(map)) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => Value::Object(map.clone()).to_string(),
        },
        other => detail_text(other),
    }
}

fn detail_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

/// Receiver side of an [`EventSink`]
pub(crate) trait EventTarget: Send + Sync {
    fn deliver(&self, attempt: u64, event: TransportEvent);
}

/// Where a transport handle reports its events
///
/// A sink is bound to the connection attempt that created it. Once the session
/// manager moves on to a newer attempt the sink is detached and everything
/// sent through it is dropped.
#[derive(Clone)]
pub struct EventSink {
    target: Weak<dyn EventTarget>,
    attempt: u64,
}

impl EventSink {
    pub(crate) fn new(target: Weak<dyn EventTarget>, attempt: u64) -> Self {
        Self { target, attempt }
    }

    /// Connection attempt this sink belongs to
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn connected(&self) {
        self.send(TransportEvent::Connected);
    }

    pub fn connect_error(&self, message: impl Into<String>) {
        self.send(TransportEvent::ConnectError(message.into()));
    }

    pub fn disconnected(&self, reason: CloseReason) {
        self.send(TransportEvent::Disconnected(reason));
    }

    pub fn auth_rejected(&self, detail: impl Into<String>) {
        self.send(TransportEvent::AuthRejected(detail.into()));
    }

    pub fn event(&self, event: impl Into<String>, args: Vec<Value>) {
        self.send(TransportEvent::Message {
            event: event.into(),
            args,
        });
    }

    /// Route a named wire event, lifecycle names included
    pub fn dispatch(&self, name: &str, args: Vec<Value>) {
        self.send(TransportEvent::from_wire(name, args));
    }

    pub fn send(&self, event: TransportEvent) {
        match self.target.upgrade() {
            Some(target) => target.deliver(self.attempt, event),
            None => log::trace!("Session gone, dropping {event:?}"),
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
