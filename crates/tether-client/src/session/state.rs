use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::ConnectionPhase;
use crate::transport::TransportHandle;

/// Most recent inbound event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastMessage {
    pub event: String,
    pub payload: Vec<Value>,
    pub received_at: DateTime<Utc>,
}

/// Immutable copy of the session handed to observers
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub phase: ConnectionPhase,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub last_message: Option<LastMessage>,
    pub retry_pending: bool,
}

/// A scheduled reconnect
///
/// Whoever takes the timer out of the session owns it: the firing task claims
/// it before connecting, `disconnect` claims it to cancel.
pub(crate) struct RetryTimer {
    pub(crate) id: u64,
    task: JoinHandle<()>,
}

impl RetryTimer {
    pub(crate) fn new(id: u64, task: JoinHandle<()>) -> Self {
        Self { id, task }
    }

    fn cancel(self) {
        self.task.abort();
    }
}

/// Mutable session state, owned by the session manager
pub(crate) struct Session {
    pub(crate) phase: ConnectionPhase,
    pub(crate) attempt_count: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) last_message: Option<LastMessage>,
    pub(crate) pending_retry: Option<RetryTimer>,
    pub(crate) handle: Option<Arc<dyn TransportHandle>>,
    /// Identifies the connection attempt whose events are accepted
    pub(crate) attempt: u64,
    /// Set once the Retry Decision ran for the current attempt
    pub(crate) episode_settled: bool,
    next_timer_id: u64,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            attempt_count: 0,
            last_error: None,
            last_message: None,
            pending_retry: None,
            handle: None,
            attempt: 0,
            episode_settled: false,
            next_timer_id: 0,
        }
    }

    pub(crate) fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            log::debug!("Connection status: {} -> {phase}", self.phase);
            self.phase = phase;
        }
    }

    /// Cancel the pending retry, if any. Returns whether one was pending.
    pub(crate) fn cancel_retry(&mut self) -> bool {
        match self.pending_retry.take() {
            Some(timer) => {
                log::debug!("Cancelled reconnection timer #{}", timer.id);
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Take the pending retry if it is still timer `id`
    pub(crate) fn claim_retry(&mut self, id: u64) -> bool {
        match &self.pending_retry {
            Some(timer) if timer.id == id => {
                self.pending_retry = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    /// Detach the current handle and open a new attempt
    ///
    /// Events still in flight from the old handle no longer match `attempt`
    /// and are dropped. The caller must close the returned handle.
    pub(crate) fn detach_handle(&mut self) -> Option<Arc<dyn TransportHandle>> {
        self.attempt += 1;
        self.episode_settled = false;
        self.handle.take()
    }

    pub(crate) fn record_message(&mut self, event: &str, payload: &[Value]) {
        self.last_message = Some(LastMessage {
            event: event.to_owned(),
            payload: payload.to_vec(),
            received_at: Utc::now(),
        });
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            attempt_count: self.attempt_count,
            last_error: self.last_error.clone(),
            last_message: self.last_message.clone(),
            retry_pending: self.pending_retry.is_some(),
        }
    }
}
