use crate::error::AppResult;

use super::message::WireMessage;

/// Something that may consume an incoming message.
pub trait MessageHandler: Send + Sync {
    /// Returns `Ok(true)` if the message was consumed.
    ///
    /// # Errors
    ///
    /// Returns an error when the message was meant for this handler but
    /// could not be processed.
    fn process(&self, message: &WireMessage) -> AppResult<bool>;

    fn shutdown(&self) {}
}

/// Ordered list of handlers; the first one to consume a message wins.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<H>(&mut self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl MessageHandler for HandlerChain {
    fn process(&self, message: &WireMessage) -> AppResult<bool> {
        for handler in &self.handlers {
            if handler.process(message)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn shutdown(&self) {
        for handler in &self.handlers {
            handler.shutdown();
        }
    }
}

impl<H> MessageHandler for std::sync::Arc<H>
where
    H: MessageHandler + ?Sized,
{
    fn process(&self, message: &WireMessage) -> AppResult<bool> {
        (**self).process(message)
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }
}
