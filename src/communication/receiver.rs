use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::CommunicationError;

use super::acceptor::{Acceptor, Connection, shutdown_signalled};
use super::codec::read_message;
use super::message::{ConnectionType, WireMessage};

/// Merges the messages of every peer of one connection type into a single
/// queue.
pub struct ServerReceiver {
    messages: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    shutdown_tx: watch::Sender<bool>,
    registration: Mutex<Option<JoinHandle<()>>>,
}

impl ServerReceiver {
    /// Claims `connection_type` connections from `acceptor`, reading from at
    /// most `max_connections` of them at once.
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
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let registration = tokio::spawn(register_readers(
            connections,
            message_tx,
            ReaderContext {
                connection_type,
                max_connections,
                slots: Arc::new(Semaphore::new(max_connections)),
                error_tx: acceptor.error_sink(),
                shutdown_rx,
            },
        ));

        Ok(Self {
            messages: tokio::sync::Mutex::new(message_rx),
            shutdown_tx,
            registration: Mutex::new(Some(registration)),
        })
    }

    /// Waits for the next message from any peer. Returns `None` once the
    /// receiver has been shut down.
    pub async fn wait_for_message(&self) -> Option<WireMessage> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut messages = tokio::select! {
            biased;
            () = shutdown_signalled(&mut shutdown_rx) => return None,
            messages = self.messages.lock() => messages,
        };
        tokio::select! {
            biased;
            () = shutdown_signalled(&mut shutdown_rx) => None,
            message = messages.recv() => message,
        }
    }

    /// Closes every peer connection and wakes all waiters.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.registration.lock().ok().and_then(|mut task| task.take()) {
            task.abort();
        }
    }
}

impl Drop for ServerReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReaderContext {
    connection_type: ConnectionType,
    max_connections: usize,
    slots: Arc<Semaphore>,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
    shutdown_rx: watch::Receiver<bool>,
}

async fn register_readers(
    mut connections: mpsc::UnboundedReceiver<Connection>,
    message_tx: mpsc::UnboundedSender<WireMessage>,
    mut context: ReaderContext,
) {
    loop {
        let connection = tokio::select! {
            biased;
            () = shutdown_signalled(&mut context.shutdown_rx) => break,
            connection = connections.recv() => match connection {
                Some(connection) => connection,
                None => break,
            },
        };

        let Ok(permit) = context.slots.clone().try_acquire_owned() else {
            warn!(
                "Rejecting {} connection from {}",
                context.connection_type.as_str(),
                connection.peer
            );
            let rejected = CommunicationError::ConnectionLimit {
                connection_type: context.connection_type.as_str(),
                peer: connection.peer.to_string(),
                limit: context.max_connections,
            };
            if context.error_tx.send(rejected).is_err() {
                debug!("Acceptor error queue closed");
            }
            continue;
        };

        let message_tx = message_tx.clone();
        let error_tx = context.error_tx.clone();
        let mut shutdown_rx = context.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut connection = connection;
            let peer = connection.peer;
            loop {
                let read = tokio::select! {
                    biased;
                    () = shutdown_signalled(&mut shutdown_rx) => break,
                    read = read_message::<_, WireMessage>(&mut connection.reader) => read,
                };
                match read {
                    Ok(message) => {
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(CommunicationError::ConnectionClosed) => {
                        debug!("Peer {} disconnected", peer);
                        break;
                    }
                    Err(err) => {
                        if error_tx.send(err).is_err() {
                            debug!("Acceptor error queue closed");
                        }
                        break;
                    }
                }
            }
            drop(permit);
        });
    }
}
