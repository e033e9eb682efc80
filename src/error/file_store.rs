use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Could not write to directory '{path}' as file with that name already exists")]
    NotADirectory { path: PathBuf },
    #[error("Could not write to directory '{path}'")]
    NotWritable { path: PathBuf },
    #[error("Failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Distributed file path '{path}' must be relative and stay inside the cache")]
    InvalidRelativePath { path: String },
    #[error("Distributed file contents for '{path}' are not valid base64: {source}")]
    InvalidContents {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("File store lock poisoned.")]
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
