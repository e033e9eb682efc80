//! The agent: keeps a file cache in sync with the console and answers its
//! process commands.

mod control;
mod file_store;
mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::communication::HandlerChain;
use crate::error::AppResult;
use crate::shutdown::{ShutdownSender, shutdown_requested};

pub use control::ControlHandler;
pub use file_store::{FileStore, FileStoreMessageHandler, README_FILE, SyncMode, SyncOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Console `host:port`.
    pub console_address: String,
    pub agent_id: String,
    pub agent_name: String,
    pub file_store_directory: PathBuf,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub worker_processes: usize,
    pub script_file: Option<String>,
}

/// Default agent identity: host name plus process id.
#[must_use]
pub fn default_agent_id() -> String {
    format!("{}-{}", default_agent_name(), std::process::id())
}

#[must_use]
pub fn default_agent_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "agent".to_owned())
}

/// Runs the agent until shutdown, reconnecting whenever the console goes
/// away.
///
/// # Errors
///
/// Returns an error if the file store directory is unusable.
pub async fn run_agent(settings: AgentSettings, shutdown_tx: &ShutdownSender) -> AppResult<()> {
    let store = Arc::new(FileStore::new(&settings.file_store_directory)?);
    let control = Arc::new(ControlHandler::new(
        settings.agent_id.clone(),
        settings.agent_name.clone(),
        store.clone(),
        settings.worker_processes,
        settings.script_file.clone(),
    ));

    let mut handlers = HandlerChain::new();
    handlers.add(store.message_handler());
    handlers.add(control.clone());

    info!(
        "Agent {} starting (file store {}, reconnect={}ms)",
        settings.agent_id,
        store.root().display(),
        settings.reconnect_delay.as_millis()
    );

    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        let result = tokio::select! {
            () = shutdown_requested(&mut shutdown_rx) => break,
            result = session::run_agent_session(
                &settings.console_address,
                settings.heartbeat_interval,
                &handlers,
                &control,
            ) => result,
        };
        if let Err(err) = result {
            warn!("Agent session error: {}", err);
        }

        tokio::select! {
            () = shutdown_requested(&mut shutdown_rx) => break,
            () = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }

    info!("Agent {} shutting down", settings.agent_id);
    Ok(())
}
