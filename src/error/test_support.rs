use super::{
    CommunicationError, ConfigError, ConsoleError, FileStoreError, ProxyError, ValidationError,
};

impl From<&'static str> for ValidationError {
    fn from(message: &'static str) -> Self {
        ValidationError::TestExpectation { message }
    }
}

impl From<String> for ValidationError {
    fn from(value: String) -> Self {
        ValidationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for CommunicationError {
    fn from(message: &'static str) -> Self {
        CommunicationError::TestExpectation { message }
    }
}

impl From<String> for CommunicationError {
    fn from(value: String) -> Self {
        CommunicationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ConsoleError {
    fn from(message: &'static str) -> Self {
        ConsoleError::TestExpectation { message }
    }
}

impl From<String> for ConsoleError {
    fn from(value: String) -> Self {
        ConsoleError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for FileStoreError {
    fn from(message: &'static str) -> Self {
        FileStoreError::TestExpectation { message }
    }
}

impl From<String> for FileStoreError {
    fn from(value: String) -> Self {
        FileStoreError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ProxyError {
    fn from(message: &'static str) -> Self {
        ProxyError::TestExpectation { message }
    }
}

impl From<String> for ProxyError {
    fn from(value: String) -> Self {
        ProxyError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}
