use tokio::net::TcpStream;

use crate::error::CommunicationError;

use super::acceptor::Connection;
use super::codec::send_message;
use super::message::{ConnectionType, Handshake};

/// Dials `addr` and performs the handshake for `connection_type`.
///
/// # Errors
///
/// Returns an error when the connection or the handshake write fails.
pub async fn connect(
    addr: &str,
    connection_type: ConnectionType,
) -> Result<Connection, CommunicationError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| CommunicationError::Connection {
            addr: addr.to_owned(),
            source: err,
        })?;
    let peer = stream.peer_addr().map_err(|err| CommunicationError::Io {
        context: "read peer address",
        source: err,
    })?;
    if stream.set_nodelay(true).is_err() {
        tracing::debug!("Failed to set TCP_NODELAY for {}", peer);
    }

    let mut connection = Connection::from_stream(stream, peer);
    send_message(&mut connection.writer, &Handshake { connection_type }).await?;
    Ok(connection)
}
