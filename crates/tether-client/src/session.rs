//! Session lifecycle
//!
//! [`SessionManager`] owns one authenticated session: it opens transport
//! handles, reacts to their lifecycle events, decides when to retry and keeps
//! the queryable [`SessionSnapshot`] current.

pub mod manager;
pub mod observer;
pub mod phase;
pub mod policy;
pub mod state;

pub use manager::{SessionManager, SessionManagerBuilder};
pub use observer::Observers;
pub use phase::ConnectionPhase;
pub use policy::{ReconnectPolicy, RetryDecision};
pub use state::{LastMessage, SessionSnapshot};
