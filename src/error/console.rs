use thiserror::Error;

use super::CommunicationError;

#[derive(Debug, Error)]
pub enum ConsoleError {
    /// An error whose user-facing text lives in the console resources.
    #[error("{resource_key}: {source}")]
    DisplayMessage {
        resource_key: &'static str,
        #[source]
        source: CommunicationError,
    },
    #[error("Failed to read distribution directory '{path}': {source}")]
    DistributionWalk {
        path: String,
        #[source]
        source: walkdir::Error,
    },
    #[error("Failed to read distributed file '{path}': {source}")]
    DistributionRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Console communication has been shut down.")]
    Closed,
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

impl ConsoleError {
    #[must_use]
    pub const fn resource_key(&self) -> Option<&'static str> {
        match self {
            Self::DisplayMessage { resource_key, .. } => Some(resource_key),
            Self::DistributionWalk { .. }
            | Self::DistributionRead { .. }
            | Self::Closed => None,
            #[cfg(test)]
            Self::TestExpectation { .. } | Self::TestExpectationValue { .. } => None,
        }
    }
}
