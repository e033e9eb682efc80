//! Line oriented console driven from standard input.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::communication::HandlerChain;
use crate::error::{AppResult, ValidationError};
use crate::shutdown::{ShutdownSender, shutdown_requested};

use super::communication::{ConnectionLimits, ConsoleCommunication};
use super::error_queue::{ErrorQueue, TracingErrorHandler};
use super::process_control::ProcessControl;
use super::process_status::{ProcessStatusHandler, ProcessStatusSet, TracingStatusListener};
use super::properties::{ConsoleAddress, ConsoleProperties};

const HELP: &str = "commands: start [script] | reset | stop | distribute [dir] | status | host <host> | port <port> | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    pub address: ConsoleAddress,
    pub limits: ConnectionLimits,
    /// Default directory for `distribute`.
    pub distribution_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(Option<String>),
    Reset,
    Stop,
    Distribute(Option<PathBuf>),
    Status,
    Host(String),
    Port(u16),
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown commands or a malformed port.
    pub fn parse(line: &str) -> Result<Option<Self>, ValidationError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Self::Start(argument.map(str::to_owned)),
            "reset" => Self::Reset,
            "stop" => Self::Stop,
            "distribute" => Self::Distribute(argument.map(PathBuf::from)),
            "status" => Self::Status,
            "host" => match argument {
                Some(host) => Self::Host(host.to_owned()),
                None => return Err(ValidationError::MissingOption { option: "host" }),
            },
            "port" => {
                let value = argument.ok_or(ValidationError::MissingOption { option: "port" })?;
                let port = value
                    .parse::<u16>()
                    .map_err(|err| ValidationError::InvalidPort {
                        value: value.to_owned(),
                        source: err,
                    })?;
                Self::Port(port)
            }
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => {
                return Err(ValidationError::UnknownCommand {
                    command: other.to_owned(),
                });
            }
        };
        Ok(Some(command))
    }
}

/// Runs the console until `quit`, Ctrl+C or another shutdown.
///
/// # Errors
///
/// Returns an error when standard input fails or the message loop panics.
pub async fn run_console(settings: ConsoleSettings, shutdown_tx: &ShutdownSender) -> AppResult<()> {
    let error_queue = Arc::new(ErrorQueue::new());
    let status = Arc::new(ProcessStatusSet::new());
    status.add_listener(Arc::new(TracingStatusListener));

    let communication = ConsoleCommunication::start(
        ConsoleProperties::new(settings.address.clone()),
        settings.limits,
        error_queue.clone(),
        status.clone(),
    )
    .await;
    error_queue.set_error_handler(Some(Arc::new(TracingErrorHandler)));
    let housekeeping = status.spawn_housekeeping();

    let mut handlers = HandlerChain::new();
    handlers.add(ProcessStatusHandler::new(status.clone()));
    let message_loop = {
        let communication = communication.clone();
        tokio::spawn(async move { communication.run_message_loop(&handlers).await })
    };

    let control = communication.process_control();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Console ready; {}", HELP);

    loop {
        let line = tokio::select! {
            () = shutdown_requested(&mut shutdown_rx) => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("Standard input closed; running until shutdown");
            shutdown_requested(&mut shutdown_rx).await;
            break;
        };

        match ConsoleCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => {
                drop(shutdown_tx.send(()));
                break;
            }
            Ok(Some(command)) => execute(command, &communication, &control, &settings),
            Err(err) => warn!("{}", err),
        }
    }

    communication.shutdown().await;
    housekeeping.stop();
    message_loop.await?;
    Ok(())
}

fn execute(
    command: ConsoleCommand,
    communication: &ConsoleCommunication,
    control: &ProcessControl,
    settings: &ConsoleSettings,
) {
    match command {
        ConsoleCommand::Start(script) => control.start_worker_processes(script),
        ConsoleCommand::Reset => control.reset_worker_processes(),
        ConsoleCommand::Stop => control.stop_worker_processes(),
        ConsoleCommand::Distribute(directory) => {
            let directory = directory.or_else(|| settings.distribution_directory.clone());
            match directory {
                Some(directory) => distribute(communication, &directory),
                None => warn!("No distribution directory given or configured"),
            }
        }
        ConsoleCommand::Status => log_status(communication),
        ConsoleCommand::Host(host) => communication.properties().set_host(&host),
        ConsoleCommand::Port(port) => communication.properties().set_port(port),
        ConsoleCommand::Help => info!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
}

fn distribute(communication: &ConsoleCommunication, directory: &Path) {
    if let Err(err) = communication.distribute_files(directory) {
        communication.error_queue().handle_console_error(err);
    }
}

fn log_status(communication: &ConsoleCommunication) {
    match communication.local_addr() {
        Some(addr) => info!(
            "Listening on {} with {} control connections",
            addr,
            communication.connected_agents()
        ),
        None => info!("Not listening"),
    }
    for agent in communication.process_status().agents() {
        info!(
            "agent {} [{}] {}",
            agent.name,
            agent.identity,
            agent.state.as_str()
        );
    }
    for worker in communication.process_status().workers() {
        info!(
            "worker {} [{}] {} {}/{} threads",
            worker.name,
            worker.identity,
            worker.state.as_str(),
            worker.running_threads,
            worker.total_threads
        );
    }
}
