use std::io::Write;
use std::sync::Mutex;

use tracing::warn;

use super::connection::ConnectionDetails;

/// Observer (and optionally rewriter) of the bytes flowing through one
/// direction of the proxy.
pub trait TcpProxyFilter: Send + Sync {
    /// Called for every fragment read. Returning `Some` replaces the bytes
    /// forwarded.
    fn handle(&self, connection: &ConnectionDetails, buffer: &[u8]) -> Option<Vec<u8>>;

    fn connection_opened(&self, _connection: &ConnectionDetails) {}

    fn connection_closed(&self, _connection: &ConnectionDetails) {}

    /// The proxy is stopping; no more calls follow.
    fn stop(&self) {}
}

/// Forwards everything untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFilter;

impl TcpProxyFilter for NullFilter {
    fn handle(&self, _connection: &ConnectionDetails, _buffer: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Prints every fragment; printable ASCII as is, everything else as
/// bracketed upper-case hex.
pub struct EchoFilter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl EchoFilter {
    #[must_use]
    pub const fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn print(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!("Echo output failed: {}", err);
        }
    }
}

/// Renders `buffer` the way [`EchoFilter`] prints it.
#[must_use]
pub fn render_fragment(buffer: &[u8]) -> String {
    let mut rendered = String::with_capacity(buffer.len());
    let mut in_hex = false;
    for &value in buffer {
        if value == b'\r' || value == b'\n' || (b' '..=b'~').contains(&value) {
            if in_hex {
                rendered.push(']');
                in_hex = false;
            }
            rendered.push(char::from(value));
        } else {
            if !in_hex {
                rendered.push('[');
                in_hex = true;
            }
            push_hex(&mut rendered, value);
        }
    }
    if in_hex {
        rendered.push(']');
    }
    rendered
}

fn push_hex(out: &mut String, value: u8) {
    for nibble in [value >> 4, value & 0x0f] {
        if let Some(digit) = char::from_digit(u32::from(nibble), 16) {
            out.push(digit.to_ascii_uppercase());
        }
    }
}

impl TcpProxyFilter for EchoFilter {
    fn handle(&self, connection: &ConnectionDetails, buffer: &[u8]) -> Option<Vec<u8>> {
        self.print(&format!(
            "------ {} ------\n{}\n",
            connection,
            render_fragment(buffer)
        ));
        None
    }

    fn connection_opened(&self, connection: &ConnectionDetails) {
        self.print(&format!("--- {} opened --\n", connection));
    }

    fn connection_closed(&self, connection: &ConnectionDetails) {
        self.print(&format!("--- {} closed --\n", connection));
    }
}
