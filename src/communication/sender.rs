use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use arcshift::ArcShift;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CommunicationError;

use super::acceptor::{Acceptor, Connection, shutdown_signalled};
use super::codec::{encode_message, write_payload};
use super::message::{ConnectionType, WireMessage};

type Payload = Arc<[u8]>;

#[derive(Clone)]
struct PeerHandle {
    peer: SocketAddr,
    outgoing: mpsc::UnboundedSender<Payload>,
}

/// Broadcasts every message to all connected peers of one connection type.
///
/// Each peer gets its own writer task; a peer whose connection fails is
/// removed and the failure is queued on the acceptor.
pub struct FanOutSender {
    peers: ArcShift<HashMap<u64, PeerHandle>>,
    shutdown_tx: watch::Sender<bool>,
    registration: Mutex<Option<JoinHandle<()>>>,
}

impl FanOutSender {
    /// Claims `connection_type` connections from `acceptor`. At most
    /// `max_connections` peers are served at once; further connections are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::ConnectionsClaimed`] if the connection
    /// type was already claimed.
    pub fn new(
        acceptor: &Acceptor,
        connection_type: ConnectionType,
        max_connections: usize,
    ) -> Result<Self, CommunicationError> {
        let connections = acceptor.take_connections(connection_type)?;
        let peers: ArcShift<HashMap<u64, PeerHandle>> = ArcShift::new(HashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let registration = tokio::spawn(register_peers(
            connections,
            peers.clone(),
            PeerContext {
                connection_type,
                max_connections,
                error_tx: acceptor.error_sink(),
                shutdown_rx,
            },
        ));

        Ok(Self {
            peers,
            shutdown_tx,
            registration: Mutex::new(Some(registration)),
        })
    }

    /// Number of peers currently connected.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.shared_get().len()
    }

    /// Queues `message` for every connected peer. Sending with no peers
    /// connected succeeds and delivers nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::SenderShutdown`] after
    /// [`FanOutSender::shutdown`], a serialization error, or
    /// [`CommunicationError::FanOut`] if some peers had already gone away.
    pub fn send(&self, message: &WireMessage) -> Result<(), CommunicationError> {
        if *self.shutdown_tx.borrow() {
            return Err(CommunicationError::SenderShutdown);
        }
        let payload: Payload = Arc::from(encode_message(message)?);

        let peers = self.peers.shared_get();
        let total = peers.len();
        let mut failed = 0_usize;
        for handle in peers.values() {
            if handle.outgoing.send(payload.clone()).is_err() {
                debug!("Peer {} is gone; dropping {}", handle.peer, message.kind());
                failed = failed.saturating_add(1);
            }
        }

        if failed > 0 {
            return Err(CommunicationError::FanOut { failed, total });
        }
        Ok(())
    }

    /// Disconnects every peer. Subsequent sends fail.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.registration.lock().ok().and_then(|mut task| task.take()) {
            task.abort();
        }
    }
}

impl Drop for FanOutSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PeerContext {
    connection_type: ConnectionType,
    max_connections: usize,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PeerContext {
    fn report(&self, error: CommunicationError) {
        if self.error_tx.send(error).is_err() {
            debug!("Acceptor error queue closed");
        }
    }
}

async fn register_peers(
    mut connections: mpsc::UnboundedReceiver<Connection>,
    mut peers: ArcShift<HashMap<u64, PeerHandle>>,
    mut context: PeerContext,
) {
    let mut next_id: u64 = 0;
    loop {
        let connection = tokio::select! {
            biased;
            () = shutdown_signalled(&mut context.shutdown_rx) => break,
            connection = connections.recv() => match connection {
                Some(connection) => connection,
                None => break,
            },
        };

        if peers.shared_get().len() >= context.max_connections {
            warn!(
                "Rejecting {} connection from {}",
                context.connection_type.as_str(),
                connection.peer
            );
            context.report(CommunicationError::ConnectionLimit {
                connection_type: context.connection_type.as_str(),
                peer: connection.peer.to_string(),
                limit: context.max_connections,
            });
            continue;
        }

        let id = next_id;
        next_id = next_id.wrapping_add(1);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            peer: connection.peer,
            outgoing,
        };
        peers.rcu(|current| {
            let mut next = current.clone();
            next.insert(id, handle.clone());
            next
        });
        debug!(
            "Registered {} peer {} ({})",
            context.connection_type.as_str(),
            connection.peer,
            id
        );

        tokio::spawn(serve_peer(
            id,
            connection,
            outgoing_rx,
            peers.clone(),
            context.shutdown_rx.clone(),
            context.error_tx.clone(),
        ));
    }

    peers.rcu(|_current| HashMap::new());
}

async fn serve_peer(
    id: u64,
    mut connection: Connection,
    mut outgoing: mpsc::UnboundedReceiver<Payload>,
    mut peers: ArcShift<HashMap<u64, PeerHandle>>,
    mut shutdown_rx: watch::Receiver<bool>,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
) {
    let peer = connection.peer;
    let mut scratch = [0_u8; 256];
    loop {
        tokio::select! {
            biased;
            () = shutdown_signalled(&mut shutdown_rx) => break,
            payload = outgoing.recv() => {
                let Some(payload) = payload else { break };
                if let Err(err) = write_payload(&mut connection.writer, &payload).await {
                    if error_tx.send(err).is_err() {
                        debug!("Acceptor error queue closed");
                    }
                    break;
                }
            }
            read = connection.reader.read(&mut scratch) => {
                // Peers never speak on this connection; anything but data means it is gone.
                match read {
                    Ok(0) | Err(_) => {
                        debug!("Peer {} disconnected", peer);
                        break;
                    }
                    Ok(_) => {}
                }
            }
        }
    }

    peers.rcu(|current| {
        let mut next = current.clone();
        next.remove(&id);
        next
    });
}
