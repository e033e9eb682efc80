//! TCP forwarder that runs every byte through a pair of filters.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::connection::{ConnectionDetails, EndPoint};
use super::filter::{EchoFilter, TcpProxyFilter};
use super::http_request::HttpRequestFilter;
use super::recording::HttpRecording;
use super::response::HttpResponseFilter;
use crate::args::ProxyMode;
use crate::error::{AppResult, ProxyError};
use crate::shutdown::{ShutdownReceiver, ShutdownSender, shutdown_requested};

const BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub listen_host: String,
    pub listen_port: u16,
    pub target: EndPoint,
    pub mode: ProxyMode,
    /// Where the recording is written when the proxy stops.
    pub output: PathBuf,
    /// Where large request bodies are written.
    pub data_directory: PathBuf,
}

pub struct TcpProxy {
    listener: TcpListener,
    target: EndPoint,
    request_filter: Arc<dyn TcpProxyFilter>,
    response_filter: Arc<dyn TcpProxyFilter>,
}

impl TcpProxy {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] if the address cannot be bound.
    pub async fn bind(
        host: &str,
        port: u16,
        target: EndPoint,
        request_filter: Arc<dyn TcpProxyFilter>,
        response_filter: Arc<dyn TcpProxyFilter>,
    ) -> Result<Self, ProxyError> {
        let listener =
            TcpListener::bind((host, port))
                .await
                .map_err(|source| ProxyError::Bind {
                    addr: format!("{}:{}", host, port),
                    source,
                })?;
        Ok(Self {
            listener,
            target,
            request_filter,
            response_filter,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        self.listener.local_addr().map_err(|source| ProxyError::Io {
            context: "local address",
            source,
        })
    }

    /// Accepts and forwards connections until shutdown, then stops both
    /// filters.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown_rx) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((client, peer)) => {
                        connections.spawn(forward(
                            client,
                            peer,
                            self.target.clone(),
                            self.request_filter.clone(),
                            self.response_filter.clone(),
                        ));
                    }
                    Err(err) => warn!("Proxy accept failed: {}", err),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = finished {
                        warn!("Proxy connection task failed: {}", err);
                    }
                }
            }
        }

        debug!("Proxy stopping with {} open connections", connections.len());
        connections.shutdown().await;
        self.request_filter.stop();
        self.response_filter.stop();
    }
}

async fn forward(
    client: TcpStream,
    peer: SocketAddr,
    target: EndPoint,
    request_filter: Arc<dyn TcpProxyFilter>,
    response_filter: Arc<dyn TcpProxyFilter>,
) {
    let server = match TcpStream::connect((target.host.as_str(), target.port)).await {
        Ok(server) => server,
        Err(source) => {
            warn!(
                "{}",
                ProxyError::Connect {
                    addr: target.to_string(),
                    source,
                }
            );
            return;
        }
    };

    let upstream = ConnectionDetails::new(EndPoint::from(peer), target, false);
    let downstream = upstream.other_end();
    request_filter.connection_opened(&upstream);
    response_filter.connection_opened(&downstream);

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();
    let (sent, received) = futures_util::future::join(
        pump(client_read, server_write, &upstream, request_filter.as_ref()),
        pump(server_read, client_write, &downstream, response_filter.as_ref()),
    )
    .await;

    request_filter.connection_closed(&upstream);
    response_filter.connection_closed(&downstream);

    match (sent, received) {
        (Ok(sent), Ok(received)) => {
            debug!("{} closed ({} bytes up, {} down)", upstream, sent, received);
        }
        (Err(err), _) | (_, Err(err)) => debug!("{} closed: {}", upstream, err),
    }
}

/// Copies one direction until end of stream, letting `filter` see (and
/// possibly replace) each fragment.
async fn pump(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    connection: &ConnectionDetails,
    filter: &dyn TcpProxyFilter,
) -> Result<u64, ProxyError> {
    let mut buffer = vec![0_u8; BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|source| ProxyError::Io {
                context: "proxy read",
                source,
            })?;
        if read == 0 {
            writer.shutdown().await.map_err(|source| ProxyError::Io {
                context: "proxy shutdown",
                source,
            })?;
            return Ok(total);
        }

        let fragment = buffer.get(..read).unwrap_or_default();
        let replacement = filter.handle(connection, fragment);
        let outgoing = replacement.as_deref().unwrap_or(fragment);
        writer
            .write_all(outgoing)
            .await
            .map_err(|source| ProxyError::Io {
                context: "proxy write",
                source,
            })?;
        total = total.saturating_add(u64::try_from(outgoing.len()).unwrap_or(u64::MAX));
    }
}

/// Runs the recording proxy until shutdown, then writes the recording.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the recording cannot
/// be written.
pub async fn run_proxy(settings: ProxySettings, shutdown_tx: &ShutdownSender) -> AppResult<()> {
    let recording = Arc::new(HttpRecording::new());
    let (request_filter, response_filter) = match settings.mode {
        ProxyMode::Record => {
            let request: Arc<dyn TcpProxyFilter> = Arc::new(HttpRequestFilter::new(
                recording.clone(),
                settings.data_directory.clone(),
            ));
            let response: Arc<dyn TcpProxyFilter> =
                Arc::new(HttpResponseFilter::new(recording.clone()));
            (request, response)
        }
        ProxyMode::Echo => {
            let echo: Arc<dyn TcpProxyFilter> = Arc::new(EchoFilter::stdout());
            (echo.clone(), echo)
        }
    };

    let proxy = TcpProxy::bind(
        &settings.listen_host,
        settings.listen_port,
        settings.target.clone(),
        request_filter,
        response_filter,
    )
    .await?;
    info!(
        "Proxy listening on {} forwarding to {} ({} mode)",
        proxy.local_addr()?,
        settings.target,
        settings.mode.as_str()
    );

    proxy.run(shutdown_tx.subscribe()).await;

    match settings.mode {
        ProxyMode::Record => {
            recording.write_to(&settings.output)?;
            info!(
                "Recorded {} requests to {}",
                recording.snapshot().requests.len(),
                settings.output.display()
            );
        }
        ProxyMode::Echo => {}
    }
    Ok(())
}
