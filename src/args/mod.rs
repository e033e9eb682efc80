//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod defaults;
pub(crate) mod parsers;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{AgentArgs, Cli, Command, ConsoleArgs, ProxyArgs};
pub use types::ProxyMode;
