use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;

use crate::error::SessionError;
use crate::transport::{CloseReason, TransportHandle};

pub type OpenCallback = Arc<dyn Fn(&dyn TransportHandle) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&CloseReason) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Optional lifecycle callbacks supplied at construction
#[derive(Clone, Default)]
pub struct Observers {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the live handle once the handshake completes
    pub fn on_open<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn TransportHandle) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(callback));
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CloseReason) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Something observers must hear about, collected while the session is locked
/// and delivered after it is released
pub(crate) enum Notification {
    Open(Arc<dyn TransportHandle>),
    Message { event: String, args: Vec<Value> },
    Close(CloseReason),
    Error(SessionError),
}

/// Single dispatch point for observer callbacks
///
/// Notifications are queued in the order the session changed and delivered
/// by one thread at a time, so observers never see them reordered.
pub(crate) struct Dispatcher {
    observers: Observers,
    catch_all: RwLock<Vec<MessageCallback>>,
    outbox: Mutex<Outbox>,
}

#[derive(Default)]
struct Outbox {
    pending: VecDeque<Notification>,
    draining: bool,
}

/// Frees the outbox if an observer panics mid-delivery
struct DrainGuard<'a>(&'a Dispatcher);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.outbox().draining = false;
        }
    }
}

impl Dispatcher {
    pub(crate) fn new(observers: Observers) -> Self {
        Self {
            observers,
            catch_all: RwLock::new(Vec::new()),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe_any(&self, handler: MessageCallback) {
        self.catch_all
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Queue notifications. Called with the session locked so that queue order
    /// is the order of state changes.
    pub(crate) fn enqueue(&self, notifications: Vec<Notification>) {
        self.outbox().pending.extend(notifications);
    }

    /// Deliver everything queued. Must not be called with the session locked.
    ///
    /// If another thread, or an observer further up this stack, is already
    /// delivering, the queue is left to it and this returns at once.
    pub(crate) fn drain(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let _guard = DrainGuard(self);

        loop {
            let next = {
                let mut outbox = self.outbox();
                let next = outbox.pending.pop_front();
                if next.is_none() {
                    outbox.draining = false;
                }
                next
            };
            match next {
                Some(notification) => self.deliver(notification),
                None => return,
            }
        }
    }

    fn deliver(&self, notification: Notification) {
        match notification {
            Notification::Open(handle) => {
                if let Some(on_open) = &self.observers.on_open {
                    on_open(handle.as_ref());
                }
            }
            Notification::Message { event, args } => {
                if let Some(on_message) = &self.observers.on_message {
                    on_message(&event, &args);
                }
                // copy out so a handler may subscribe another one
                let handlers = self
                    .catch_all
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for handler in handlers {
                    handler(&event, &args);
                }
            }
            Notification::Close(reason) => {
                if let Some(on_close) = &self.observers.on_close {
                    on_close(&reason);
                }
            }
            Notification::Error(error) => {
                if let Some(on_error) = &self.observers.on_error {
                    on_error(&error);
                }
            }
        }
    }
}
