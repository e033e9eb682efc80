use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What the proxy does with the traffic it forwards.
#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Record HTTP requests into a replayable document.
    #[default]
    Record,
    /// Print every fragment to standard output.
    Echo,
}

impl ProxyMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProxyMode::Record => "record",
            ProxyMode::Echo => "echo",
        }
    }
}
