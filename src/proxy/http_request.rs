//! Turns the client side of proxied HTTP connections into a [`Recording`].
//!
//! Each connection gets its own [`handler::Handler`], created when the
//! connection opens (or on its first bytes) and finished exactly once when
//! it closes. Handlers of different connections run independently; calls
//! for one connection are serialized by that handler's lock.

mod body;
mod handler;
mod interning;
mod patterns;
mod query;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::connection::ConnectionDetails;
use super::filter::TcpProxyFilter;
use super::recording::Recording;
use crate::error::ProxyError;
use handler::{Handler, RequestContext};

pub struct HttpRequestFilter {
    context: RequestContext,
    handlers: Mutex<HashMap<ConnectionDetails, Arc<Mutex<Handler>>>>,
}

impl HttpRequestFilter {
    /// Bodies too large to inline are written below `data_directory`.
    #[must_use]
    pub fn new(recording: Arc<dyn Recording>, data_directory: impl Into<PathBuf>) -> Self {
        Self {
            context: RequestContext::new(recording, data_directory.into()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of connections with a live handler.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.handlers.lock().map_or(0, |handlers| handlers.len())
    }

    fn handler(&self, connection: &ConnectionDetails) -> Option<Arc<Mutex<Handler>>> {
        let mut handlers = self.handlers.lock().ok()?;
        let handler = handlers
            .entry(connection.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Handler::new(connection.clone()))));
        Some(Arc::clone(handler))
    }

    fn finish(&self, handler: &Mutex<Handler>) {
        if let Ok(mut handler) = handler.lock() {
            handler.end_message(&self.context);
        }
    }
}

impl TcpProxyFilter for HttpRequestFilter {
    fn handle(&self, connection: &ConnectionDetails, buffer: &[u8]) -> Option<Vec<u8>> {
        if let Some(handler) = self.handler(connection)
            && let Ok(mut handler) = handler.lock()
        {
            handler.handle(&self.context, buffer);
        }
        None
    }

    fn connection_opened(&self, connection: &ConnectionDetails) {
        drop(self.handler(connection));
    }

    fn connection_closed(&self, connection: &ConnectionDetails) {
        let removed = self
            .handlers
            .lock()
            .ok()
            .and_then(|mut handlers| handlers.remove(connection));

        match removed {
            Some(handler) => self.finish(&handler),
            None => warn!(
                "{}",
                ProxyError::UnknownConnection {
                    connection: connection.to_string(),
                }
            ),
        }
    }

    fn stop(&self) {
        let drained: Vec<Arc<Mutex<Handler>>> = match self.handlers.lock() {
            Ok(mut handlers) => handlers.drain().map(|(_, handler)| handler).collect(),
            Err(_) => Vec::new(),
        };
        debug!("Finishing {} open connections", drained.len());
        for handler in drained {
            self.finish(&handler);
        }
    }
}
