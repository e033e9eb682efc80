//! Configuration loading and application.
mod apply;
mod loader;
pub mod types;


pub use apply::{agent_settings, console_settings, proxy_settings};
pub use loader::load_config;

#[cfg(test)]
pub(crate) use loader::load_config_file;
