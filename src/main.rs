mod cli;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tether_client::{ConnectionPhase, Observers, SessionManager, SessionSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::command().get_matches();
    let options = cli::CliOptions::from_matches(&matches)?;

    tether_client::setup(Some(options.log_level()));

    let config = options.session_config()?;
    log::debug!("Session target: {}", config.policy().endpoint(&config.base_url));

    let session = config
        .builder()
        .observers(observers())
        .auto_connect(false)
        .build()?;
    session.connect()?;

    let result = run(&session, options.send).await;
    session.disconnect();
    log::info!("Session closed");
    result
}

fn observers() -> Observers {
    Observers::new()
        .on_open(|handle| match handle.id() {
            Some(id) => log::info!("Connected as {id}"),
            None => log::info!("Connected"),
        })
        .on_message(|event, args| {
            log::info!("<- {event} {}", Value::Array(args.to_vec()));
        })
        .on_close(|reason| log::info!("Connection closed: {reason}"))
        .on_error(|e| log::error!("{e}"))
}

/// Follow the session until Ctrl-C or a failure no retry will fix
async fn run(session: &SessionManager, mut pending_send: Option<(String, Value)>) -> Result<()> {
    let mut updates = session.watch();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot);

                if snapshot.phase.is_connected() {
                    if let Some((event, payload)) = pending_send.take() {
                        session.send(&event, payload)?;
                        log::info!("-> {event}");
                    }
                }
                if snapshot.phase == ConnectionPhase::Error && !snapshot.retry_pending {
                    let reason = snapshot.last_error.unwrap_or_else(|| "unknown error".to_owned());
                    return Err(anyhow!("Giving up: {reason}"));
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::warn!("Failed to listen for Ctrl-C: {e}");
                }
                log::info!("Interrupted, disconnecting");
                return Ok(());
            }
        }
    }
}

fn log_snapshot(snapshot: &SessionSnapshot) {
    log::debug!(
        "Session {} (attempt {}, retry pending: {})",
        snapshot.phase,
        snapshot.attempt_count,
        snapshot.retry_pending
    );
}
