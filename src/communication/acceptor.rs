use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CommunicationError;

use super::codec::read_message;
use super::message::{ConnectionType, Handshake};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// An accepted (or dialled) connection whose handshake has completed.
pub struct Connection {
    pub peer: SocketAddr,
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl Connection {
    pub(crate) fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer,
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }
}

struct Routes {
    control: mpsc::UnboundedSender<Connection>,
    report: mpsc::UnboundedSender<Connection>,
}

impl Routes {
    const fn route(&self, connection_type: ConnectionType) -> &mpsc::UnboundedSender<Connection> {
        match connection_type {
            ConnectionType::Control => &self.control,
            ConnectionType::Report => &self.report,
        }
    }
}

/// Listening socket that sorts incoming connections by the type named in
/// their handshake.
///
/// Problems seen by the accept loop, and by senders and receivers built on
/// top of the acceptor, are queued and surface through
/// [`Acceptor::pending_error`].
pub struct Acceptor {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    control: Mutex<Option<mpsc::UnboundedReceiver<Connection>>>,
    report: Mutex<Option<mpsc::UnboundedReceiver<Connection>>>,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
    errors: tokio::sync::Mutex<mpsc::UnboundedReceiver<CommunicationError>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Binds `host:port` and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::Bind`] when the address cannot be bound.
    pub async fn bind(host: &str, port: u16) -> Result<Arc<Self>, CommunicationError> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| CommunicationError::Bind {
                addr: addr.clone(),
                source: err,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| CommunicationError::Io {
                context: "read bound address",
                source: err,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let routes = Routes {
            control: control_tx,
            report: report_tx,
        };
        let accept_task = tokio::spawn(accept_loop(
            listener,
            routes,
            error_tx.clone(),
            shutdown_rx,
        ));
        info!("Accepting connections on {}", local_addr);

        Ok(Arc::new(Self {
            local_addr,
            shutdown_tx,
            control: Mutex::new(Some(control_rx)),
            report: Mutex::new(Some(report_rx)),
            error_tx,
            errors: tokio::sync::Mutex::new(error_rx),
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hands out the stream of connections of one type. Each type can be
    /// claimed once.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicationError::ConnectionsClaimed`] on a second claim.
    pub fn take_connections(
        &self,
        connection_type: ConnectionType,
    ) -> Result<mpsc::UnboundedReceiver<Connection>, CommunicationError> {
        let slot = match connection_type {
            ConnectionType::Control => &self.control,
            ConnectionType::Report => &self.report,
        };
        slot.lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(CommunicationError::ConnectionsClaimed {
                connection_type: connection_type.as_str(),
            })
    }

    pub(crate) fn error_sink(&self) -> mpsc::UnboundedSender<CommunicationError> {
        self.error_tx.clone()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Waits for the next queued problem. Returns `None` once the acceptor
    /// has shut down and the queue is drained.
    pub async fn pending_error(&self) -> Option<CommunicationError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut errors = self.errors.lock().await;
        if let Ok(error) = errors.try_recv() {
            return Some(error);
        }
        if *shutdown_rx.borrow_and_update() {
            return None;
        }
        tokio::select! {
            biased;
            error = errors.recv() => error,
            () = shutdown_signalled(&mut shutdown_rx) => errors.try_recv().ok(),
        }
    }

    /// Stops accepting and releases the listening socket.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let task = self.accept_task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => warn!("Accept loop for {} failed: {}", self.local_addr, err),
            }
        }
        debug!("Acceptor on {} shut down", self.local_addr);
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if let Ok(mut task) = self.accept_task.lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }
    }
}

/// Resolves once `shutdown_rx` reads `true` or its sender is gone. Holds no
/// `watch::Ref` across an await, so spawned `select!` loops stay `Send`.
pub(super) async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    routes: Routes,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let routes = Arc::new(routes);
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if stream.set_nodelay(true).is_err() {
                            debug!("Failed to set TCP_NODELAY for {}", peer);
                        }
                        tokio::spawn(handshake(stream, peer, routes.clone(), error_tx.clone()));
                    }
                    Err(err) => {
                        if error_tx
                            .send(CommunicationError::Io {
                                context: "accept connection",
                                source: err,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    routes: Arc<Routes>,
    error_tx: mpsc::UnboundedSender<CommunicationError>,
) {
    let mut connection = Connection::from_stream(stream, peer);
    let result = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_message::<_, Handshake>(&mut connection.reader),
    )
    .await;

    let hello = match result {
        Ok(Ok(hello)) => hello,
        Ok(Err(CommunicationError::ConnectionClosed)) => {
            debug!("Connection from {} closed before handshake", peer);
            return;
        }
        Ok(Err(err)) => {
            if error_tx.send(err).is_err() {
                debug!("Dropping handshake error from {}", peer);
            }
            return;
        }
        Err(_elapsed) => {
            let timeout = CommunicationError::HandshakeTimeout {
                peer: peer.to_string(),
            };
            if error_tx.send(timeout).is_err() {
                debug!("Dropping handshake timeout from {}", peer);
            }
            return;
        }
    };

    debug!(
        "Accepted {} connection from {}",
        hello.connection_type.as_str(),
        peer
    );
    if routes.route(hello.connection_type).send(connection).is_err() {
        debug!(
            "No consumer for {} connections; closing {}",
            hello.connection_type.as_str(),
            peer
        );
    }
}
