//! Reconnecting, authenticated event session client
//!
//! Opens an authenticated session over a message-oriented transport,
//! multiplexes named events across it and reconnects on unexpected loss
//! according to a bounded fixed-interval policy.

pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{
    ConnectionPhase, LastMessage, Observers, ReconnectPolicy, SessionManager, SessionSnapshot,
};
pub use transport::{CloseReason, Transport, TransportHandle};

/// Load `.env` and initialise logging
///
/// With `None` the level comes from `RUST_LOG`. Safe to call more than once.
pub fn setup(level: Option<log::LevelFilter>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.filter_level(level);
    }
    let initialized = builder.try_init().is_ok();

    match config::ENV_GUARD.as_ref() {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) => log::debug!("No .env file loaded: {e}"),
    }
    if !initialized {
        log::debug!("Logger already initialized, using existing logger");
    }
}
