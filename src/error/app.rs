use thiserror::Error;

use super::{
    CommunicationError, ConfigError, ConsoleError, FileStoreError, ProxyError, SleeperError,
    ValidationError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),
    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),
    #[error("File store error: {0}")]
    FileStore(#[from] FileStoreError),
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("Sleeper error: {0}")]
    Sleeper(#[from] SleeperError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn communication<E>(error: E) -> Self
    where
        E: Into<CommunicationError>,
    {
        error.into().into()
    }

    pub fn console<E>(error: E) -> Self
    where
        E: Into<ConsoleError>,
    {
        error.into().into()
    }

    pub fn file_store<E>(error: E) -> Self
    where
        E: Into<FileStoreError>,
    {
        error.into().into()
    }

    pub fn proxy<E>(error: E) -> Self
    where
        E: Into<ProxyError>,
    {
        error.into().into()
    }

    pub fn sleeper<E>(error: E) -> Self
    where
        E: Into<SleeperError>,
    {
        error.into().into()
    }

    /// True when the error only signals a cooperative shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Sleeper(SleeperError::Shutdown))
    }
}
