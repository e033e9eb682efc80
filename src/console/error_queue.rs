//! Error sink that buffers until a handler is attached.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::error::{AppError, ConsoleError};

use super::resources;

/// Receiver of console errors, typically a UI.
pub trait ErrorHandler: Send + Sync {
    fn handle_error_message(&self, message: &str, title: Option<&str>);

    /// `resource_key` names a console text; `default_message` is used when
    /// the key is unknown.
    fn handle_resource_error_message(
        &self,
        resource_key: &str,
        default_message: &str,
        title: Option<&str>,
    );

    fn handle_error(&self, error: AppError, title: Option<&str>);
}

enum DelayedError {
    Message {
        message: String,
        title: Option<String>,
    },
    Resource {
        resource_key: String,
        default_message: String,
        title: Option<String>,
    },
    Error {
        error: AppError,
        title: Option<String>,
    },
}

impl DelayedError {
    fn apply(self, handler: &dyn ErrorHandler) {
        match self {
            Self::Message { message, title } => {
                handler.handle_error_message(&message, title.as_deref());
            }
            Self::Resource {
                resource_key,
                default_message,
                title,
            } => handler.handle_resource_error_message(
                &resource_key,
                &default_message,
                title.as_deref(),
            ),
            Self::Error { error, title } => handler.handle_error(error, title.as_deref()),
        }
    }
}

#[derive(Default)]
struct QueueState {
    delegate: Option<Arc<dyn ErrorHandler>>,
    pending: VecDeque<DelayedError>,
}

/// Queues errors until [`ErrorQueue::set_error_handler`] attaches a
/// delegate, then replays them in arrival order. Later errors go straight to
/// the delegate.
#[derive(Default)]
pub struct ErrorQueue {
    state: Mutex<QueueState>,
}

impl ErrorQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches (or with `None`, detaches) the delegate. Anything queued is
    /// reported to the new delegate immediately.
    pub fn set_error_handler(&self, handler: Option<Arc<dyn ErrorHandler>>) {
        let Ok(mut state) = self.state.lock() else {
            error!("Error queue lock poisoned; dropping handler change");
            return;
        };
        state.delegate = handler;

        if let Some(delegate) = state.delegate.clone() {
            while let Some(delayed) = state.pending.pop_front() {
                delayed.apply(delegate.as_ref());
            }
        }
    }

    /// Number of errors waiting for a delegate.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().map_or(0, |state| state.pending.len())
    }

    pub fn handle_console_error(&self, error: ConsoleError) {
        self.handle_error(AppError::console(error), None);
    }

    fn queue(&self, delayed: DelayedError) {
        let Ok(mut state) = self.state.lock() else {
            error!("Error queue lock poisoned; dropping error");
            return;
        };
        match state.delegate.clone() {
            Some(delegate) => delayed.apply(delegate.as_ref()),
            None => state.pending.push_back(delayed),
        }
    }
}

impl ErrorHandler for ErrorQueue {
    fn handle_error_message(&self, message: &str, title: Option<&str>) {
        self.queue(DelayedError::Message {
            message: message.to_owned(),
            title: title.map(str::to_owned),
        });
    }

    fn handle_resource_error_message(
        &self,
        resource_key: &str,
        default_message: &str,
        title: Option<&str>,
    ) {
        self.queue(DelayedError::Resource {
            resource_key: resource_key.to_owned(),
            default_message: default_message.to_owned(),
            title: title.map(str::to_owned),
        });
    }

    fn handle_error(&self, error: AppError, title: Option<&str>) {
        self.queue(DelayedError::Error {
            error,
            title: title.map(str::to_owned),
        });
    }
}

/// Handler that writes every error to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn handle_error_message(&self, message: &str, title: Option<&str>) {
        match title {
            Some(title) => error!("{}: {}", title, message),
            None => error!("{}", message),
        }
    }

    fn handle_resource_error_message(
        &self,
        resource_key: &str,
        default_message: &str,
        title: Option<&str>,
    ) {
        let message = resources::text(resource_key).unwrap_or(default_message);
        self.handle_error_message(message, title);
    }

    fn handle_error(&self, error: AppError, title: Option<&str>) {
        let resolved = if let AppError::Console(console_error) = &error {
            console_error
                .resource_key()
                .and_then(resources::text)
                .map(|text| format!("{} ({})", text, error))
        } else {
            None
        };
        let message = resolved.unwrap_or_else(|| error.to_string());
        self.handle_error_message(&message, title);
    }
}
