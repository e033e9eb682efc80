//! Merges command line arguments, the config file and built-in defaults.
//! A value given on the command line always wins.

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{AgentSettings, default_agent_id, default_agent_name};
use crate::args::defaults::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT, DEFAULT_RECONNECT_DELAY,
    DEFAULT_RECORDING_FILE, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT, DEFAULT_WORKER_PROCESSES,
    default_file_store_directory,
};
use crate::args::parsers::parse_endpoint;
use crate::args::{AgentArgs, ConsoleArgs, ProxyArgs};
use crate::console::{
    ConnectionLimits, ConsoleAddress, ConsoleSettings, DEFAULT_CONSOLE_HOST, DEFAULT_CONSOLE_PORT,
    DEFAULT_MAX_CONNECTIONS,
};
use crate::error::ConfigError;
use crate::proxy::{EndPoint, ProxySettings};

use super::types::{AgentConfig, ConsoleConfig, DurationValue, ProxyConfig};

/// # Errors
///
/// Returns an error when a connection limit in the file is zero.
pub fn console_settings(
    args: &ConsoleArgs,
    config: Option<&ConsoleConfig>,
) -> Result<ConsoleSettings, ConfigError> {
    let empty = ConsoleConfig::default();
    let file = config.unwrap_or(&empty);

    let address = ConsoleAddress {
        host: args
            .host
            .clone()
            .or_else(|| file.host.clone())
            .unwrap_or_else(|| DEFAULT_CONSOLE_HOST.to_owned()),
        port: args.port.or(file.port).unwrap_or(DEFAULT_CONSOLE_PORT),
    };
    let limits = ConnectionLimits {
        max_control_connections: args.max_control_connections.map_or_else(
            || {
                positive(
                    file.max_control_connections,
                    "console.max_control_connections",
                )
            },
            Ok,
        )?,
        max_report_connections: args.max_report_connections.map_or_else(
            || positive(file.max_report_connections, "console.max_report_connections"),
            Ok,
        )?,
    };

    Ok(ConsoleSettings {
        address,
        limits,
        distribution_directory: args
            .distribution_directory
            .clone()
            .or_else(|| file.distribution_directory.clone()),
    })
}

/// # Errors
///
/// Returns an error when a file value is malformed: a bad console address,
/// a zero or unparsable duration, or zero worker processes.
pub fn agent_settings(
    args: &AgentArgs,
    config: Option<&AgentConfig>,
) -> Result<AgentSettings, ConfigError> {
    let empty = AgentConfig::default();
    let file = config.unwrap_or(&empty);

    let console = args.console.clone().map_or_else(
        || {
            endpoint(
                file.console.as_deref(),
                "agent.console",
                EndPoint::new("localhost", DEFAULT_CONSOLE_PORT),
            )
        },
        Ok,
    )?;
    let reconnect_delay = args.reconnect_delay.map_or_else(
        || {
            duration(
                file.reconnect_delay.as_ref(),
                "agent.reconnect_delay",
                DEFAULT_RECONNECT_DELAY,
            )
        },
        Ok,
    )?;
    let heartbeat_interval = args.heartbeat_interval.map_or_else(
        || {
            duration(
                file.heartbeat_interval.as_ref(),
                "agent.heartbeat_interval",
                DEFAULT_HEARTBEAT_INTERVAL,
            )
        },
        Ok,
    )?;
    let worker_processes = match (args.worker_processes, file.worker_processes) {
        (Some(workers), _) => workers,
        (None, Some(0)) => {
            return Err(ConfigError::FieldMustBePositive {
                field: "agent.worker_processes",
            });
        }
        (None, Some(workers)) => workers,
        (None, None) => DEFAULT_WORKER_PROCESSES,
    };

    Ok(AgentSettings {
        console_address: console.to_string(),
        agent_id: args
            .agent_id
            .clone()
            .or_else(|| file.agent_id.clone())
            .unwrap_or_else(default_agent_id),
        agent_name: args
            .agent_name
            .clone()
            .or_else(|| file.agent_name.clone())
            .unwrap_or_else(default_agent_name),
        file_store_directory: args
            .file_store_directory
            .clone()
            .or_else(|| file.file_store_directory.clone())
            .unwrap_or_else(default_file_store_directory),
        reconnect_delay,
        heartbeat_interval,
        worker_processes,
        script_file: args
            .script_file
            .clone()
            .or_else(|| file.script_file.clone()),
    })
}

/// # Errors
///
/// Returns an error when the file's target is not `host:port`.
pub fn proxy_settings(
    args: &ProxyArgs,
    config: Option<&ProxyConfig>,
) -> Result<ProxySettings, ConfigError> {
    let empty = ProxyConfig::default();
    let file = config.unwrap_or(&empty);

    let target = args.target.clone().map_or_else(
        || {
            endpoint(
                file.target.as_deref(),
                "proxy.target",
                EndPoint::new(DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT),
            )
        },
        Ok,
    )?;

    Ok(ProxySettings {
        listen_host: args
            .listen_host
            .clone()
            .or_else(|| file.listen_host.clone())
            .unwrap_or_else(|| DEFAULT_PROXY_HOST.to_owned()),
        listen_port: args
            .listen_port
            .or(file.listen_port)
            .unwrap_or(DEFAULT_PROXY_PORT),
        target,
        mode: args.mode.or(file.mode).unwrap_or_default(),
        output: args
            .output
            .clone()
            .or_else(|| file.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_FILE)),
        data_directory: args
            .data_directory
            .clone()
            .or_else(|| file.data_directory.clone())
            .unwrap_or_else(|| PathBuf::from(".")),
    })
}

fn positive(value: Option<usize>, field: &'static str) -> Result<usize, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::FieldMustBePositive { field }),
        Some(limit) => Ok(limit),
        None => Ok(DEFAULT_MAX_CONNECTIONS),
    }
}

fn endpoint(
    value: Option<&str>,
    field: &'static str,
    default: EndPoint,
) -> Result<EndPoint, ConfigError> {
    value.map_or(Ok(default), |text| {
        parse_endpoint(text).map_err(|source| ConfigError::InvalidValue { field, source })
    })
}

fn duration(
    value: Option<&DurationValue>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), |text| {
        text.to_duration()
            .map_err(|source| ConfigError::InvalidDuration { field, source })
    })
}
