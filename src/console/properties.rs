use std::sync::Arc;

use tokio::sync::watch;

pub const DEFAULT_CONSOLE_HOST: &str = "0.0.0.0";
pub const DEFAULT_CONSOLE_PORT: u16 = 6372;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleAddress {
    pub host: String,
    pub port: u16,
}

impl Default for ConsoleAddress {
    fn default() -> Self {
        Self {
            host: DEFAULT_CONSOLE_HOST.to_owned(),
            port: DEFAULT_CONSOLE_PORT,
        }
    }
}

/// Observable console settings. Clones share state; every change of host
/// or port is published to subscribers.
#[derive(Debug, Clone)]
pub struct ConsoleProperties {
    address: Arc<watch::Sender<ConsoleAddress>>,
}

impl Default for ConsoleProperties {
    fn default() -> Self {
        Self::new(ConsoleAddress::default())
    }
}

impl ConsoleProperties {
    #[must_use]
    pub fn new(address: ConsoleAddress) -> Self {
        let (sender, _receiver) = watch::channel(address);
        Self {
            address: Arc::new(sender),
        }
    }

    #[must_use]
    pub fn address(&self) -> ConsoleAddress {
        self.address.borrow().clone()
    }

    pub fn set_host(&self, host: &str) {
        self.address.send_if_modified(|address| {
            if address.host == host {
                return false;
            }
            host.clone_into(&mut address.host);
            true
        });
    }

    pub fn set_port(&self, port: u16) {
        self.address.send_if_modified(|address| {
            if address.port == port {
                return false;
            }
            address.port = port;
            true
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConsoleAddress> {
        self.address.subscribe()
    }
}
