mod app;
mod communication;
mod config;
mod console;
mod file_store;
mod proxy;
mod sleeper;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use communication::CommunicationError;
pub use config::ConfigError;
pub use console::ConsoleError;
pub use file_store::FileStoreError;
pub use proxy::ProxyError;
pub use sleeper::SleeperError;
pub use validation::ValidationError;
