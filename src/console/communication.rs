use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::communication::{
    Acceptor, ConnectionType, FanOutSender, HandlerChain, MessageHandler, ServerReceiver,
    WireMessage,
};
use crate::error::{AppError, CommunicationError, ConsoleError};

use super::error_queue::{ErrorHandler, ErrorQueue};
use super::process_status::ProcessStatusSet;
use super::properties::{ConsoleAddress, ConsoleProperties};
use super::resources;

pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Upper bounds on concurrently served agent connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_control_connections: usize,
    pub max_report_connections: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_control_connections: DEFAULT_MAX_CONNECTIONS,
            max_report_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// One bound acceptor with its sender and receiver.
struct Plane {
    acceptor: Arc<Acceptor>,
    sender: FanOutSender,
    receiver: ServerReceiver,
}

impl Plane {
    async fn shutdown(&self) {
        self.acceptor.shutdown().await;
        self.sender.shutdown();
        self.receiver.shutdown();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkState {
    /// No receiver is available; waiters park until this clears.
    deaf: bool,
    /// Callers currently inside the receiver.
    listening: usize,
    closed: bool,
}

/// Releases a listening slot, even if the waiting future is dropped.
struct Listening<'link> {
    link: &'link watch::Sender<LinkState>,
}

impl Drop for Listening<'_> {
    fn drop(&mut self) {
        self.link.send_modify(|state| {
            state.listening = state.listening.saturating_sub(1);
        });
    }
}

/// The console's side of agent communication.
///
/// Owns the current acceptor, the fan-out sender for control connections
/// and the receiver for report connections, and rebuilds all three
/// whenever the console address changes.
pub struct ConsoleCommunication {
    properties: ConsoleProperties,
    limits: ConnectionLimits,
    error_queue: Arc<ErrorQueue>,
    process_status: Arc<ProcessStatusSet>,
    plane: Mutex<Option<Arc<Plane>>>,
    link: watch::Sender<LinkState>,
    reset_lock: tokio::sync::Mutex<()>,
    property_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleCommunication {
    /// Binds the configured address and starts following property changes.
    /// A bind failure is queued on `error_queue`, not returned.
    pub async fn start(
        properties: ConsoleProperties,
        limits: ConnectionLimits,
        error_queue: Arc<ErrorQueue>,
        process_status: Arc<ProcessStatusSet>,
    ) -> Arc<Self> {
        let (link, _link_rx) = watch::channel(LinkState {
            deaf: true,
            ..LinkState::default()
        });
        let mut address_rx = properties.subscribe();
        address_rx.borrow_and_update();

        let communication = Arc::new(Self {
            properties,
            limits,
            error_queue,
            process_status,
            plane: Mutex::new(None),
            link,
            reset_lock: tokio::sync::Mutex::new(()),
            property_watcher: Mutex::new(None),
        });
        communication.reset().await;

        let watcher = tokio::spawn(follow_properties(
            Arc::downgrade(&communication),
            address_rx,
        ));
        if let Ok(mut slot) = communication.property_watcher.lock() {
            *slot = Some(watcher);
        }
        communication
    }

    #[must_use]
    pub fn error_queue(&self) -> &Arc<ErrorQueue> {
        &self.error_queue
    }

    #[must_use]
    pub fn process_status(&self) -> &Arc<ProcessStatusSet> {
        &self.process_status
    }

    #[must_use]
    pub const fn properties(&self) -> &ConsoleProperties {
        &self.properties
    }

    /// Address currently accepting agents, if bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current_plane().map(|plane| plane.acceptor.local_addr())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.borrow().closed
    }

    /// Number of connected control peers.
    #[must_use]
    pub fn connected_agents(&self) -> usize {
        self.current_plane()
            .map_or(0, |plane| plane.sender.peer_count())
    }

    /// Tears down the current acceptor, sender and receiver, waits for
    /// every caller of [`wait_for_message`](Self::wait_for_message) to
    /// leave the old receiver, and binds the configured address again.
    pub async fn reset(&self) {
        let _serialized = self.reset_lock.lock().await;
        if self.link.borrow().closed {
            return;
        }

        self.link.send_modify(|state| state.deaf = true);
        let previous = self.take_plane();
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        let mut link_rx = self.link.subscribe();
        if link_rx
            .wait_for(|state| state.listening == 0)
            .await
            .is_err()
        {
            return;
        }

        let ConsoleAddress { host, port } = self.properties.address();
        let acceptor = match Acceptor::bind(&host, port).await {
            Ok(acceptor) => acceptor,
            Err(err) => {
                warn!("Console failed to bind {}:{}", host, port);
                self.error_queue
                    .handle_console_error(ConsoleError::DisplayMessage {
                        resource_key: resources::LOCAL_BIND_ERROR,
                        source: err,
                    });
                return;
            }
        };

        let plane = match self.build_plane(&acceptor) {
            Ok(plane) => plane,
            Err(err) => {
                acceptor.shutdown().await;
                self.error_queue.handle_error(err, None);
                return;
            }
        };

        let problems = acceptor.clone();
        let error_queue = self.error_queue.clone();
        tokio::spawn(async move {
            while let Some(problem) = problems.pending_error().await {
                error_queue.handle_error(classify_problem(problem), None);
            }
            debug!("Problem listener for {} finished", problems.local_addr());
        });

        info!("Console listening on {}", acceptor.local_addr());
        if let Ok(mut slot) = self.plane.lock() {
            *slot = Some(Arc::new(plane));
        }
        self.link.send_modify(|state| state.deaf = false);
    }

    fn build_plane(&self, acceptor: &Arc<Acceptor>) -> Result<Plane, AppError> {
        let sender = FanOutSender::new(
            acceptor,
            ConnectionType::Control,
            self.limits.max_control_connections,
        )?;
        let receiver = ServerReceiver::new(
            acceptor,
            ConnectionType::Report,
            self.limits.max_report_connections,
        )?;
        Ok(Plane {
            acceptor: acceptor.clone(),
            sender,
            receiver,
        })
    }

    /// Sends `message` to every connected agent. Failures are reported to
    /// the error queue.
    pub fn send(&self, message: &WireMessage) {
        let Some(plane) = self.current_plane() else {
            self.error_queue.handle_resource_error_message(
                resources::SEND_ERROR,
                "Failed to send message",
                None,
            );
            return;
        };
        if let Err(err) = plane.sender.send(message) {
            self.error_queue
                .handle_console_error(ConsoleError::DisplayMessage {
                    resource_key: resources::SEND_ERROR,
                    source: err,
                });
        }
    }

    /// Waits for the next report from any agent or worker, riding out
    /// resets. Returns `None` only after [`shutdown`](Self::shutdown).
    pub async fn wait_for_message(&self) -> Option<WireMessage> {
        loop {
            let listening = self.enter_listening().await?;
            let message = match self.current_plane() {
                Some(plane) => plane.receiver.wait_for_message().await,
                None => None,
            };
            drop(listening);

            if message.is_some() {
                return message;
            }
            debug!("Receiver went away; waiting for reset");
        }
    }

    /// Feeds every received message through `handlers` until shutdown.
    pub async fn run_message_loop(&self, handlers: &HandlerChain) {
        while let Some(message) = self.wait_for_message().await {
            match handlers.process(&message) {
                Ok(true) => {}
                Ok(false) => debug!("Ignoring unhandled {} message", message.kind()),
                Err(err) => self.error_queue.handle_error(err, None),
            }
        }
        handlers.shutdown();
        debug!("Console message loop finished");
    }

    /// Closes the communication for good and wakes every waiter.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self
            .property_watcher
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
        {
            watcher.abort();
        }

        let _serialized = self.reset_lock.lock().await;
        self.link.send_modify(|state| {
            state.closed = true;
            state.deaf = true;
        });
        let plane = self.take_plane();
        if let Some(plane) = plane {
            plane.shutdown().await;
        }
        info!("Console communication shut down");
    }

    async fn enter_listening(&self) -> Option<Listening<'_>> {
        let mut link_rx = self.link.subscribe();
        loop {
            let mut entered = false;
            let mut closed = false;
            self.link.send_if_modified(|state| {
                if state.closed {
                    closed = true;
                    return false;
                }
                if state.deaf {
                    return false;
                }
                state.listening = state.listening.saturating_add(1);
                entered = true;
                true
            });
            if closed {
                return None;
            }
            if entered {
                return Some(Listening { link: &self.link });
            }
            if link_rx
                .wait_for(|state| state.closed || !state.deaf)
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    fn current_plane(&self) -> Option<Arc<Plane>> {
        self.plane.lock().ok().and_then(|slot| slot.clone())
    }

    fn take_plane(&self) -> Option<Arc<Plane>> {
        self.plane.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Undecodable reports get the receive text; everything else is shown as is.
fn classify_problem(problem: CommunicationError) -> AppError {
    match problem {
        CommunicationError::Deserialize { .. }
        | CommunicationError::WireMessageTooLarge { .. }
        | CommunicationError::WireMessageInvalidUtf8 { .. } => {
            AppError::console(ConsoleError::DisplayMessage {
                resource_key: resources::RECEIVE_ERROR,
                source: problem,
            })
        }
        other @ (CommunicationError::Io { .. }
        | CommunicationError::Connection { .. }
        | CommunicationError::Bind { .. }
        | CommunicationError::ConnectionClosed
        | CommunicationError::Serialize { .. }
        | CommunicationError::HandshakeTimeout { .. }
        | CommunicationError::ConnectionLimit { .. }
        | CommunicationError::ConnectionsClaimed { .. }
        | CommunicationError::FanOut { .. }
        | CommunicationError::SenderShutdown) => AppError::communication(other),
        #[cfg(test)]
        other @ (CommunicationError::TestExpectation { .. }
        | CommunicationError::TestExpectationValue { .. }) => AppError::communication(other),
    }
}

async fn follow_properties(
    communication: Weak<ConsoleCommunication>,
    mut address_rx: watch::Receiver<ConsoleAddress>,
) {
    while address_rx.changed().await.is_ok() {
        let address = address_rx.borrow_and_update().clone();
        let Some(communication) = communication.upgrade() else {
            break;
        };
        info!(
            "Console address changed to {}:{}; rebinding",
            address.host, address.port
        );
        communication.reset().await;
    }
}
