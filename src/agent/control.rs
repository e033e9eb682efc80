use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::communication::{
    AgentProcessStatus, InitialiseWorkerMessage, MessageHandler, ProcessState, StartMessage,
    WireMessage, WorkerProcessStatus,
};
use crate::error::{AppResult, FileStoreError};

use super::file_store::FileStore;

#[derive(Debug)]
struct ControlState {
    state: ProcessState,
    script_file: Option<String>,
    workers: Vec<InitialiseWorkerMessage>,
}

/// Reacts to the console's start, reset and stop commands.
///
/// A start prepares one [`InitialiseWorkerMessage`] per configured worker
/// against the synced file store; the prepared workers are what the agent
/// reports back to the console.
pub struct ControlHandler {
    agent_id: String,
    agent_name: String,
    store: Arc<FileStore>,
    worker_processes: usize,
    state: Mutex<ControlState>,
}

impl ControlHandler {
    #[must_use]
    pub fn new(
        agent_id: String,
        agent_name: String,
        store: Arc<FileStore>,
        worker_processes: usize,
        script_file: Option<String>,
    ) -> Self {
        Self {
            agent_id,
            agent_name,
            store,
            worker_processes,
            state: Mutex::new(ControlState {
                state: ProcessState::Started,
                script_file,
                workers: Vec::new(),
            }),
        }
    }

    /// Builds the start-up message for one worker. Syncs the file store so
    /// the script directory is current.
    ///
    /// # Errors
    ///
    /// Returns an error when the file store cannot be synced.
    pub fn worker_init(
        &self,
        worker_id: &str,
        script_file: &str,
    ) -> Result<InitialiseWorkerMessage, FileStoreError> {
        let directory = self.store.directory()?;
        Ok(InitialiseWorkerMessage {
            agent_id: self.agent_id.clone(),
            worker_id: worker_id.to_owned(),
            report_to_console: true,
            script_file: script_file.to_owned(),
            script_directory: directory.display().to_string(),
        })
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
            .lock()
            .map_or(ProcessState::Unknown, |state| state.state)
    }

    /// Workers prepared by the last start.
    #[must_use]
    pub fn prepared_workers(&self) -> Vec<InitialiseWorkerMessage> {
        self.state
            .lock()
            .map(|state| state.workers.clone())
            .unwrap_or_default()
    }

    /// Agent status followed by one report per prepared worker.
    #[must_use]
    pub fn status_reports(&self) -> Vec<WireMessage> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut reports = Vec::with_capacity(state.workers.len().saturating_add(1));
        reports.push(WireMessage::AgentStatusReport(AgentProcessStatus {
            identity: self.agent_id.clone(),
            name: self.agent_name.clone(),
            state: state.state,
        }));
        for worker in &state.workers {
            reports.push(WireMessage::WorkerStatusReport(WorkerProcessStatus {
                identity: worker.worker_id.clone(),
                name: format!("{} {}", self.agent_name, worker.worker_id),
                state: state.state,
                total_threads: 0,
                running_threads: 0,
            }));
        }
        reports
    }

    fn start(&self, message: &StartMessage) -> AppResult<()> {
        let script_file = {
            let mut state = self
                .state
                .lock()
                .map_err(|_err| FileStoreError::LockPoisoned)?;
            if message.script_file.is_some() {
                state.script_file.clone_from(&message.script_file);
            }
            state.script_file.clone()
        };
        let Some(script_file) = script_file else {
            warn!("Start received but no script is configured");
            return Ok(());
        };

        let mut workers = Vec::with_capacity(self.worker_processes);
        for index in 0..self.worker_processes {
            let worker_id = format!("{}-{}", self.agent_id, index);
            workers.push(self.worker_init(&worker_id, &script_file)?);
        }
        info!(
            "Prepared {} worker processes for {}",
            workers.len(),
            script_file
        );

        let mut state = self
            .state
            .lock()
            .map_err(|_err| FileStoreError::LockPoisoned)?;
        state.workers = workers;
        state.state = ProcessState::Running;
        Ok(())
    }

    fn transition(&self, next: ProcessState) {
        if let Ok(mut state) = self.state.lock() {
            state.state = next;
            if next == ProcessState::Finished {
                debug!("Releasing {} prepared workers", state.workers.len());
            }
        }
    }
}

impl MessageHandler for ControlHandler {
    fn process(&self, message: &WireMessage) -> AppResult<bool> {
        match message {
            WireMessage::Start(start) => {
                self.start(start)?;
                Ok(true)
            }
            WireMessage::Reset => {
                info!("Reset requested");
                if let Ok(mut state) = self.state.lock() {
                    state.workers.clear();
                }
                self.transition(ProcessState::Started);
                Ok(true)
            }
            WireMessage::Stop => {
                info!("Stop requested");
                self.transition(ProcessState::Finished);
                Ok(true)
            }
            WireMessage::InitialiseWorker(init) => {
                debug!("Ignoring worker initialisation for {}", init.worker_id);
                Ok(false)
            }
            WireMessage::ClearCache
            | WireMessage::DistributeFile(_)
            | WireMessage::AgentStatusReport(_)
            | WireMessage::WorkerStatusReport(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn handler(workers: usize, script: Option<&str>) -> AppResult<(tempfile::TempDir, ControlHandler)> {
        let scratch = tempfile::tempdir()?;
        let store = Arc::new(FileStore::new(scratch.path())?);
        let handler = ControlHandler::new(
            "agent-7".to_owned(),
            "loadgen".to_owned(),
            store,
            workers,
            script.map(str::to_owned),
        );
        Ok((scratch, handler))
    }

    #[test]
    fn worker_init_points_at_current_directory() -> AppResult<()> {
        let (scratch, handler) = handler(1, None)?;
        let init = handler.worker_init("agent-7-0", "scenario.py")?;
        let expected = std::path::absolute(scratch.path().join("current"))?;
        if init.script_directory != expected.display().to_string() {
            return Err(AppError::validation(format!(
                "Unexpected directory: {}",
                init.script_directory
            )));
        }
        if !init.report_to_console || init.agent_id != "agent-7" {
            return Err(AppError::validation("Unexpected worker init fields"));
        }
        Ok(())
    }

    #[test]
    fn start_prepares_workers_and_reports_them() -> AppResult<()> {
        let (_scratch, handler) = handler(2, Some("default.py"))?;
        let start = WireMessage::Start(StartMessage {
            script_file: Some("override.py".to_owned()),
        });
        if !handler.process(&start)? {
            return Err(AppError::validation("Start was not consumed"));
        }

        let workers = handler.prepared_workers();
        let scripts: Vec<&str> = workers.iter().map(|w| w.script_file.as_str()).collect();
        if scripts != vec!["override.py", "override.py"] {
            return Err(AppError::validation(format!("Unexpected scripts: {:?}", scripts)));
        }
        if handler.state() != ProcessState::Running {
            return Err(AppError::validation("Agent should be running"));
        }
        if handler.status_reports().len() != 3 {
            return Err(AppError::validation("Expected agent plus two worker reports"));
        }

        handler.process(&WireMessage::Stop)?;
        if handler.state() != ProcessState::Finished {
            return Err(AppError::validation("Agent should be finished"));
        }
        handler.process(&WireMessage::Reset)?;
        if handler.state() != ProcessState::Started || !handler.prepared_workers().is_empty() {
            return Err(AppError::validation("Reset should clear prepared workers"));
        }
        Ok(())
    }

    #[test]
    fn start_without_script_prepares_nothing() -> AppResult<()> {
        let (_scratch, handler) = handler(3, None)?;
        handler.process(&WireMessage::Start(StartMessage { script_file: None }))?;
        if !handler.prepared_workers().is_empty() || handler.state() != ProcessState::Started {
            return Err(AppError::validation("Nothing should have started"));
        }
        Ok(())
    }
}
