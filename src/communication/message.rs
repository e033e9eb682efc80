use serde::{Deserialize, Serialize};

/// The two kinds of connection an agent opens to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Console to agent commands.
    Control,
    /// Agent and worker status reports back to the console.
    Report,
}

impl ConnectionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Report => "report",
        }
    }
}

/// First line written on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub connection_type: ConnectionType,
}

/// Lifecycle state carried by status reports.
///
/// The declaration order is the sort order used by status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Started,
    Running,
    Finished,
    Unknown,
}

impl ProcessState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProcessStatus {
    /// Unique per worker process; status reports with the same identity
    /// replace each other.
    pub identity: String,
    pub name: String,
    pub state: ProcessState,
    pub total_threads: u16,
    pub running_threads: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProcessStatus {
    pub identity: String,
    pub name: String,
    pub state: ProcessState,
}

/// A single distributed file. `contents_b64` is standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContents {
    pub relative_path: String,
    pub contents_b64: String,
}

/// Everything a freshly launched worker needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialiseWorkerMessage {
    pub agent_id: String,
    pub worker_id: String,
    pub report_to_console: bool,
    pub script_file: String,
    pub script_directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    /// Script to run; `None` keeps whatever the agent is configured with.
    pub script_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    ClearCache,
    DistributeFile(FileContents),
    InitialiseWorker(InitialiseWorkerMessage),
    Reset,
    Start(StartMessage),
    Stop,
    AgentStatusReport(AgentProcessStatus),
    WorkerStatusReport(WorkerProcessStatus),
}

impl WireMessage {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ClearCache => "clear_cache",
            Self::DistributeFile(_) => "distribute_file",
            Self::InitialiseWorker(_) => "initialise_worker",
            Self::Reset => "reset",
            Self::Start(_) => "start",
            Self::Stop => "stop",
            Self::AgentStatusReport(_) => "agent_status_report",
            Self::WorkerStatusReport(_) => "worker_status_report",
        }
    }
}
