//! The console: coordinates agents over the communication layer and keeps
//! track of the worker processes they run.

mod communication;
mod distribution;
mod error_queue;
mod process_control;
mod process_status;
mod properties;
mod resources;
mod session;

pub use communication::{ConnectionLimits, ConsoleCommunication, DEFAULT_MAX_CONNECTIONS};
pub use distribution::collect_files;
pub use error_queue::{ErrorHandler, ErrorQueue, TracingErrorHandler};
pub use process_control::ProcessControl;
pub use process_status::{
    FLUSH_PERIOD, Housekeeping, ProcessStatusHandler, ProcessStatusListener, ProcessStatusSet,
    TracingStatusListener, UPDATE_PERIOD,
};
pub use properties::{
    ConsoleAddress, ConsoleProperties, DEFAULT_CONSOLE_HOST, DEFAULT_CONSOLE_PORT,
};
pub use resources::text as resource_text;
pub use session::{ConsoleCommand, ConsoleSettings, run_console};

#[cfg(test)]
mod tests;
