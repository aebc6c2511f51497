use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::observer::{Dispatcher, Notification, Observers};
use super::state::{RetryTimer, Session};
use super::{ConnectionPhase, LastMessage, ReconnectPolicy, RetryDecision, SessionSnapshot};
use crate::error::SessionError;
use crate::transport::{
    CloseReason, ConnectRequest, EventSink, EventTarget, Transport, TransportEvent,
};

/// Connection lifecycle controller
///
/// All commands return immediately; network outcomes arrive later through the
/// transport and show up in [`SessionManager::snapshot`], the watch channel and
/// the observers. Dropping the manager cancels any pending retry and closes the
/// live connection.
pub struct SessionManager {
    shared: Arc<Shared>,
}

pub struct SessionManagerBuilder {
    base_url: String,
    credential: Option<String>,
    policy: ReconnectPolicy,
    observers: Observers,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
    auto_connect: bool,
}

impl SessionManagerBuilder {
    pub fn credential(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(token.into());
        self
    }

    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Runtime for retry timers. Defaults to the runtime `build` runs on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Connect as soon as the manager is built
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn build(self) -> Result<SessionManager, SessionError> {
        if self.base_url.trim().is_empty() {
            return Err(SessionError::InvalidConfig("base url is required".to_owned()));
        }
        self.policy.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| SessionError::InvalidConfig(format!("no tokio runtime: {e}")))?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let credential = self.credential.filter(|token| !token.is_empty());

        let session = Session::new();
        let (snapshots, _) = watch::channel(session.snapshot());

        let shared = Arc::new_cyclic(|this| Shared {
            this: this.clone(),
            base_url: self.base_url,
            credential,
            policy: self.policy,
            transport,
            runtime,
            commands: Mutex::new(()),
            session: Mutex::new(session),
            dispatcher: Dispatcher::new(self.observers),
            snapshots,
        });
        let manager = SessionManager { shared };

        if self.auto_connect {
            if let Err(e) = manager.connect() {
                log::warn!("{e}");
            }
        }

        Ok(manager)
    }
}

#[cfg(feature = "websocket")]
fn default_transport() -> Result<Arc<dyn Transport>, SessionError> {
    Ok(Arc::new(crate::transport::WsTransport::new()))
}

#[cfg(not(feature = "websocket"))]
fn default_transport() -> Result<Arc<dyn Transport>, SessionError> {
    Err(SessionError::InvalidConfig(
        "no transport configured".to_owned(),
    ))
}

impl SessionManager {
    pub fn builder(base_url: impl Into<String>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            base_url: base_url.into(),
            credential: None,
            policy: ReconnectPolicy::default(),
            observers: Observers::default(),
            transport: None,
            runtime: None,
            auto_connect: false,
        }
    }

    /// Start a connection attempt, tearing down any previous connection
    ///
    /// Resets the attempt counter and cancels a pending retry. Fails only when
    /// no credential is configured, in which case nothing changes.
    pub fn connect(&self) -> Result<(), SessionError> {
        {
            let _command = self.shared.lock_commands();
            self.shared.start_attempt(true)?;
        }
        self.shared.dispatcher.drain();
        Ok(())
    }

    /// Same as [`connect`](Self::connect); valid in every phase
    pub fn reconnect(&self) -> Result<(), SessionError> {
        log::info!("Reconnect requested");
        self.connect()
    }

    /// Close the session. No automatic reconnection follows.
    pub fn disconnect(&self) {
        {
            let _command = self.shared.lock_commands();
            log::info!("Manually disconnecting");
            self.shared.teardown(true);
        }
        self.shared.dispatcher.drain();
    }

    pub fn send(&self, event: &str, payload: Value) -> Result<(), SessionError> {
        let handle = {
            let session = self.shared.lock_session();
            if session.phase.is_connected() {
                session.handle.clone()
            } else {
                None
            }
        };

        match handle {
            Some(handle) if handle.is_connected() => {
                handle.emit(event, payload)?;
                log::debug!("Sent event: {event}");
                Ok(())
            }
            _ => {
                log::warn!("Cannot send message - not connected");
                Err(SessionError::NotConnected)
            }
        }
    }

    /// Register a catch-all observer for every inbound event
    pub fn subscribe_any<F>(&self, handler: F)
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe_any(Arc::new(handler));
    }

    pub fn status(&self) -> ConnectionPhase {
        self.shared.lock_session().phase
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        self.shared.lock_session().last_message.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock_session().last_error.clone()
    }

    pub fn attempt_count(&self) -> u32 {
        self.shared.lock_session().attempt_count
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock_session().snapshot()
    }

    /// Receiver that sees every state change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Wait until the session satisfies `condition`
    pub async fn wait_for<F>(&self, condition: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let mut receiver = self.watch();
        match receiver.wait_for(|snapshot| condition(snapshot)).await {
            Ok(snapshot) => snapshot.clone(),
            // the sender lives as long as `self`
            Err(_) => self.snapshot(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.shared.base_url
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let _command = self.shared.lock_commands();
        log::debug!("Disposing session");
        self.shared.teardown(false);
    }
}

pub(crate) struct Shared {
    this: Weak<Shared>,
    base_url: String,
    credential: Option<String>,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    /// Serialises connect, disconnect, retry firing and disposal
    commands: Mutex<()>,
    session: Mutex<Session>,
    dispatcher: Dispatcher,
    snapshots: watch::Sender<SessionSnapshot>,
}

/// What the Retry Decision did with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryOutcome {
    Scheduled,
    Exhausted,
    Disabled,
    /// An earlier failure of the same attempt already decided
    AlreadySettled,
}

impl Shared {
    fn lock_commands(&self) -> MutexGuard<'_, ()> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        self.snapshots.send_replace(session.snapshot());
    }

    /// Caller holds the command lock and drains the dispatcher after releasing it
    fn start_attempt(&self, explicit: bool) -> Result<(), SessionError> {
        let Some(token) = self.credential.as_deref() else {
            log::warn!("No credential provided, skipping connection");
            return Err(SessionError::MissingCredential);
        };

        let url = self.policy.endpoint(&self.base_url);
        log::info!("Attempting to connect to {url}");
        log::debug!("Using credential of length {}", token.len());

        let (previous, attempt) = {
            let mut session = self.lock_session();
            session.cancel_retry();
            if explicit {
                session.attempt_count = 0;
            }
            let previous = session.detach_handle();
            session.set_phase(ConnectionPhase::Connecting);
            session.last_error = None;
            self.publish(&session);
            (previous, session.attempt)
        };

        if let Some(previous) = previous {
            log::debug!("Closing connection from superseded attempt");
            previous.disconnect();
        }

        let request = ConnectRequest::new(
            url,
            token,
            &self.policy.client_type,
            self.policy.connect_timeout,
        );
        let target: Weak<dyn EventTarget> = self.this.clone();

        match self.transport.open(request, EventSink::new(target, attempt)) {
            Ok(handle) => {
                self.lock_session().handle = Some(handle.clone());
                handle.connect();
            }
            Err(e) => {
                log::error!("Failed to create connection: {e}");
                let error = SessionError::from(e);
                let mut session = self.lock_session();
                session.last_error = Some(error.to_string());
                session.set_phase(ConnectionPhase::Error);
                session.episode_settled = true;
                self.publish(&session);
                self.dispatcher.enqueue(vec![Notification::Error(error)]);
            }
        }

        Ok(())
    }

    /// Caller holds the command lock. With `notify` a live connection
    /// reports `ClientDisconnect` to the observers.
    fn teardown(&self, notify: bool) {
        let previous = {
            let mut session = self.lock_session();
            session.cancel_retry();
            let previous = session.detach_handle();
            session.set_phase(ConnectionPhase::Disconnected);
            session.attempt_count = 0;
            self.publish(&session);

            let was_connected = previous.as_ref().is_some_and(|handle| handle.is_connected());
            if notify && was_connected {
                self.dispatcher
                    .enqueue(vec![Notification::Close(CloseReason::ClientDisconnect)]);
            }
            previous
        };

        if let Some(handle) = previous {
            handle.disconnect();
        }
    }

    fn fire_retry(&self, timer_id: u64) {
        {
            let _command = self.lock_commands();

            let attempt = {
                let mut session = self.lock_session();
                if !session.claim_retry(timer_id) {
                    log::trace!("Reconnection timer #{timer_id} no longer pending");
                    return;
                }
                self.publish(&session);
                session.attempt_count
            };

            log::info!(
                "Reconnection attempt {attempt}/{}",
                self.policy.max_reconnect_attempts
            );
            if let Err(e) = self.start_attempt(false) {
                log::warn!("Reconnection attempt {attempt} aborted: {e}");
                return;
            }
        }
        self.dispatcher.drain();
    }

    fn schedule_retry(&self, session: &mut Session, delay: Duration) {
        session.cancel_retry();

        let timer_id = session.next_timer_id();
        let this = self.this.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = this.upgrade() {
                shared.fire_retry(timer_id);
            }
        });

        session.pending_retry = Some(RetryTimer::new(timer_id, task));
    }

    fn retry_decision(&self, session: &mut Session) -> RetryOutcome {
        if session.episode_settled {
            log::debug!("Failure already handled for this attempt");
            return RetryOutcome::AlreadySettled;
        }
        session.episode_settled = true;

        match self.policy.decide(session.attempt_count) {
            RetryDecision::Schedule { attempt, delay } => {
                session.attempt_count = attempt;
                log::info!(
                    "Scheduling reconnection attempt {attempt}/{} in {}ms",
                    self.policy.max_reconnect_attempts,
                    delay.as_millis()
                );
                self.schedule_retry(session, delay);
                RetryOutcome::Scheduled
            }
            RetryDecision::Exhausted => {
                log::error!("Max reconnection attempts reached");
                session.last_error = Some(
                    SessionError::RetryExhausted {
                        attempts: session.attempt_count,
                    }
                    .to_string(),
                );
                RetryOutcome::Exhausted
            }
            RetryDecision::Disabled => RetryOutcome::Disabled,
        }
    }

    fn apply(&self, session: &mut Session, event: TransportEvent) -> Vec<Notification> {
        let mut notifications = Vec::new();

        match event {
            TransportEvent::Connected => {
                log::info!("Connection established");
                session.set_phase(ConnectionPhase::Connected);
                // an error earlier in this attempt may have armed a retry
                session.cancel_retry();
                session.attempt_count = 0;
                session.last_error = None;
                session.episode_settled = false;
                if let Some(handle) = &session.handle {
                    if let Some(id) = handle.id() {
                        log::debug!("Connection id: {id}");
                    }
                    notifications.push(Notification::Open(handle.clone()));
                }
            }
            TransportEvent::Message { event, args } => {
                log::debug!("Received event: {event} with {} args", args.len());
                session.record_message(&event, &args);
                notifications.push(Notification::Message { event, args });
            }
            TransportEvent::ConnectError(message) => {
                log::error!("Connection error: {message}");
                session.last_error = Some(message.clone());
                session.set_phase(ConnectionPhase::Error);
                let outcome = self.retry_decision(session);
                notifications.push(Notification::Error(SessionError::TransportConnect(message)));
                if outcome == RetryOutcome::Exhausted {
                    notifications.push(Notification::Error(SessionError::RetryExhausted {
                        attempts: session.attempt_count,
                    }));
                }
            }
            TransportEvent::Disconnected(reason) => {
                log::info!("Disconnected: {reason}");
                session.set_phase(ConnectionPhase::Disconnected);
                let mut exhausted = false;
                if reason.is_unexpected() {
                    exhausted = self.retry_decision(session) == RetryOutcome::Exhausted;
                    if session.pending_retry.is_none() {
                        if session.last_error.is_none() {
                            session.last_error =
                                Some(format!("Connection closed unexpectedly: {reason}"));
                        }
                        session.set_phase(ConnectionPhase::Error);
                    }
                }
                notifications.push(Notification::Close(reason));
                if exhausted {
                    notifications.push(Notification::Error(SessionError::RetryExhausted {
                        attempts: session.attempt_count,
                    }));
                }
            }
            TransportEvent::AuthRejected(detail) => {
                log::error!("Authentication error: {detail}");
                let error = SessionError::AuthRejected(detail);
                session.last_error = Some(error.to_string());
                session.set_phase(ConnectionPhase::Error);
                // the close that usually follows must not retry a rejected credential
                session.episode_settled = true;
                notifications.push(Notification::Error(error));
            }
        }

        notifications
    }
}

impl EventTarget for Shared {
    fn deliver(&self, attempt: u64, event: TransportEvent) {
        {
            let mut session = self.lock_session();
            if attempt != session.attempt {
                log::trace!("Dropping {event:?} from superseded attempt #{attempt}");
                return;
            }
            let notifications = self.apply(&mut session, event);
            self.publish(&session);
            self.dispatcher.enqueue(notifications);
        }

        self.dispatcher.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn builder(transport: &MemoryTransport) -> SessionManagerBuilder {
        SessionManager::builder("http://localhost:8080")
            .credential("token")
            .transport(transport.clone())
    }

    #[tokio::test]
    async fn test_build_rejects_empty_base_url() {
        let result = SessionManager::builder("  ")
            .transport(MemoryTransport::new())
            .build();
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_policy() {
        let transport = MemoryTransport::new();
        let result = builder(&transport)
            .policy(ReconnectPolicy::new().reconnect_interval(Duration::ZERO))
            .build();
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_requires_runtime() {
        let transport = MemoryTransport::new();
        let result = builder(&transport).build();
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_auto_connect() {
        let transport = MemoryTransport::new();
        let manager = builder(&transport).auto_connect(true).build().unwrap();

        assert_eq!(manager.status(), ConnectionPhase::Connecting);
        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.last_handle().unwrap().connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_auto_connect_without_credential() {
        let transport = MemoryTransport::new();
        let manager = SessionManager::builder("http://localhost:8080")
            .transport(transport.clone())
            .auto_connect(true)
            .build()
            .unwrap();

        assert_eq!(manager.status(), ConnectionPhase::Disconnected);
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_credential_counts_as_missing() {
        let transport = MemoryTransport::new();
        let manager = SessionManager::builder("http://localhost:8080")
            .credential("")
            .transport(transport.clone())
            .build()
            .unwrap();

        assert_eq!(manager.connect(), Err(SessionError::MissingCredential));
        assert_eq!(manager.status(), ConnectionPhase::Disconnected);
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_request_targets_namespace() {
        let transport = MemoryTransport::new();
        let manager = builder(&transport)
            .policy(ReconnectPolicy::new().namespace("/chat").client_type("cli"))
            .build()
            .unwrap();
        manager.connect().unwrap();

        let handle = transport.last_handle().unwrap();
        let request = handle.request();
        assert_eq!(request.url, "http://localhost:8080/chat");
        assert_eq!(request.auth.token, "token");
        assert_eq!(request.header("Authorization"), Some("Bearer token"));
        assert_eq!(request.header("X-Client-Type"), Some("cli"));
        assert!(!request.reconnection);
    }

    #[tokio::test]
    async fn test_open_failure_sets_error_without_retry() {
        let transport = MemoryTransport::new();
        transport.refuse_open(Some("bad url"));
        let manager = builder(&transport).build().unwrap();

        manager.connect().unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.phase, ConnectionPhase::Error);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Transport error: Failed to create connection: bad url")
        );
        assert!(!snapshot.retry_pending);
        assert_eq!(snapshot.attempt_count, 0);
    }
}
