use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndPoint {
    pub host: String,
    pub port: u16,
}

impl EndPoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for EndPoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of one proxied connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDetails {
    /// The client side of the connection.
    pub local: EndPoint,
    /// The server the connection is forwarded to.
    pub remote: EndPoint,
    pub secure: bool,
}

impl ConnectionDetails {
    #[must_use]
    pub const fn new(local: EndPoint, remote: EndPoint, secure: bool) -> Self {
        Self {
            local,
            remote,
            secure,
        }
    }

    /// The same connection seen from the other end.
    #[must_use]
    pub fn other_end(&self) -> Self {
        Self {
            local: self.remote.clone(),
            remote: self.local.clone(),
            secure: self.secure,
        }
    }
}

impl fmt::Display for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.local, self.remote)
    }
}
