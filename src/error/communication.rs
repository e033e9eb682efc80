use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Timed out waiting for handshake from {peer}.")]
    HandshakeTimeout { peer: String },
    #[error("Rejected {connection_type} connection from {peer}: limit of {limit} reached.")]
    ConnectionLimit {
        connection_type: &'static str,
        peer: String,
        limit: usize,
    },
    #[error("Acceptor connections for {connection_type} were already claimed.")]
    ConnectionsClaimed { connection_type: &'static str },
    #[error("Failed to deliver message to {failed} of {total} peers.")]
    FanOut { failed: usize, total: usize },
    #[error("Sender has been shut down.")]
    SenderShutdown,
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
