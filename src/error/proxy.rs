use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unknown connection {connection}")]
    UnknownConnection { connection: String },
    #[error("Malformed name/value string '{input}': {reason}")]
    MalformedQuery { input: String, reason: &'static str },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to connect to target {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write recording '{path}': {source}")]
    WriteRecording {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize recording: {source}")]
    SerializeRecording {
        #[source]
        source: serde_json::Error,
    },
    #[error("Proxy state lock poisoned.")]
    LockPoisoned,
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
