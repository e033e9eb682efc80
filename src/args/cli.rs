use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::proxy::EndPoint;

use super::parsers::{parse_duration_arg, parse_endpoint, parse_positive_usize};
use super::types::ProxyMode;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load testing: a console that drives agents, and a proxy that records HTTP sessions."
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Path to a TOML or JSON config file (defaults to ./stampede.toml or ./stampede.json)
    #[arg(long = "config", short = 'c', env = "STAMPEDE_CONFIG", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the console that coordinates agents
    Console(ConsoleArgs),
    /// Run an agent that connects to a console
    Agent(AgentArgs),
    /// Run the recording TCP proxy
    Proxy(ProxyArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ConsoleArgs {
    /// Host the console listens on
    #[arg(long = "host", env = "STAMPEDE_CONSOLE_HOST")]
    pub host: Option<String>,

    /// Port the console listens on
    #[arg(long = "port", env = "STAMPEDE_CONSOLE_PORT")]
    pub port: Option<u16>,

    /// Maximum concurrent control connections
    #[arg(long = "max-control-connections", value_parser = parse_positive_usize)]
    pub max_control_connections: Option<usize>,

    /// Maximum concurrent report connections
    #[arg(long = "max-report-connections", value_parser = parse_positive_usize)]
    pub max_report_connections: Option<usize>,

    /// Directory sent to agents by `distribute`
    #[arg(long = "distribution-directory", env = "STAMPEDE_DISTRIBUTION_DIRECTORY")]
    pub distribution_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct AgentArgs {
    /// Console address (host:port)
    #[arg(long = "console", env = "STAMPEDE_CONSOLE_ADDRESS", value_parser = parse_endpoint)]
    pub console: Option<EndPoint>,

    /// Unique agent identity (defaults to host name and process id)
    #[arg(long = "agent-id", env = "STAMPEDE_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Display name reported to the console
    #[arg(long = "agent-name", env = "STAMPEDE_AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Directory that caches distributed files
    #[arg(long = "file-store", env = "STAMPEDE_FILE_STORE")]
    pub file_store_directory: Option<PathBuf>,

    /// Delay before reconnecting to the console (supports ms/s/m/h)
    #[arg(long = "reconnect-delay", value_parser = parse_duration_arg)]
    pub reconnect_delay: Option<Duration>,

    /// Interval between status reports (supports ms/s/m/h)
    #[arg(long = "heartbeat", value_parser = parse_duration_arg)]
    pub heartbeat_interval: Option<Duration>,

    /// Worker processes prepared on start
    #[arg(long = "workers", value_parser = parse_positive_usize)]
    pub worker_processes: Option<usize>,

    /// Script used when the console does not name one
    #[arg(long = "script")]
    pub script_file: Option<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ProxyArgs {
    /// Host the proxy listens on
    #[arg(long = "listen-host", env = "STAMPEDE_PROXY_HOST")]
    pub listen_host: Option<String>,

    /// Port the proxy listens on
    #[arg(long = "listen-port", env = "STAMPEDE_PROXY_PORT")]
    pub listen_port: Option<u16>,

    /// Server connections are forwarded to (host:port)
    #[arg(long = "target", env = "STAMPEDE_PROXY_TARGET", value_parser = parse_endpoint)]
    pub target: Option<EndPoint>,

    /// Record requests or echo raw traffic
    #[arg(long = "mode", value_enum)]
    pub mode: Option<ProxyMode>,

    /// Where the recording is written on shutdown
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,

    /// Directory for request bodies too large to inline
    #[arg(long = "data-directory")]
    pub data_directory: Option<PathBuf>,
}
