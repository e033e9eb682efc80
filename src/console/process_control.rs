use std::sync::Arc;

use tracing::info;

use crate::communication::{StartMessage, WireMessage};

use super::communication::ConsoleCommunication;

/// Start, reset and stop commands for every connected agent. Each command
/// opens a new process status generation before it is sent.
#[derive(Clone)]
pub struct ProcessControl {
    communication: Arc<ConsoleCommunication>,
}

impl ProcessControl {
    #[must_use]
    pub const fn new(communication: Arc<ConsoleCommunication>) -> Self {
        Self { communication }
    }

    pub fn start_worker_processes(&self, script_file: Option<String>) {
        info!(
            "Starting worker processes ({})",
            script_file.as_deref().unwrap_or("configured script")
        );
        self.communication.process_status().process_event();
        self.communication
            .send(&WireMessage::Start(StartMessage { script_file }));
    }

    pub fn reset_worker_processes(&self) {
        info!("Resetting worker processes");
        self.communication.process_status().process_event();
        self.communication.send(&WireMessage::Reset);
    }

    pub fn stop_worker_processes(&self) {
        info!("Stopping worker processes");
        self.communication.process_status().process_event();
        self.communication.send(&WireMessage::Stop);
    }
}

impl ConsoleCommunication {
    #[must_use]
    pub fn process_control(self: &Arc<Self>) -> ProcessControl {
        ProcessControl::new(Arc::clone(self))
    }
}
