use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::args::ProxyMode;
use crate::args::parsers::parse_duration;
use crate::error::ValidationError;

/// Contents of `stampede.toml` / `stampede.json`. Every section and field is
/// optional; command line values take precedence.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub console: Option<ConsoleConfig>,
    pub agent: Option<AgentConfig>,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_control_connections: Option<usize>,
    pub max_report_connections: Option<usize>,
    pub distribution_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// Console `host:port`.
    pub console: Option<String>,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub file_store_directory: Option<PathBuf>,
    pub reconnect_delay: Option<DurationValue>,
    pub heartbeat_interval: Option<DurationValue>,
    pub worker_processes: Option<usize>,
    pub script_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    /// Target `host:port`.
    pub target: Option<String>,
    pub mode: Option<ProxyMode>,
    pub output: Option<PathBuf>,
    pub data_directory: Option<PathBuf>,
}

/// A duration written either as whole seconds or as text with a unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    Err(ValidationError::DurationZero)
                } else {
                    Ok(Duration::from_secs(*secs))
                }
            }
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}
