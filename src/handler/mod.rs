//! The `handler` module holds the message-processing pipeline.
//!
//! A [`MessageHandler`] consumes one relay record and answers whether the
//! record should continue down the chain (`true`) or has been fully
//! consumed (`false`). [`MessageHandlerChain`] runs its members in order and
//! stops at the first `false`.

pub mod ack;
pub mod output;
pub mod reply_to;
pub mod republish;
pub mod standard;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::codec::EncodedMessage;

pub use ack::{ACK_DESTINATION, AckHandler, is_ack_message};
pub use output::StreamOutputHandler;
pub use reply_to::ReplyToHandler;
pub use republish::MessageRepublisher;
pub use standard::standard_chain;

/// One stage of the processing pipeline.
pub trait MessageHandler: Send + Sync {
    /// Returns `true` to pass the message on, `false` when it was consumed.
    fn handle(&self, message: &EncodedMessage) -> bool;
}

impl<F> MessageHandler for F
where
    F: Fn(&EncodedMessage) -> bool + Send + Sync,
{
    fn handle(&self, message: &EncodedMessage) -> bool {
        self(message)
    }
}

/// Runs `handler` on `message`, turning a panic into "stop propagation".
pub fn dispatch(handler: &dyn MessageHandler, message: &EncodedMessage) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
        Ok(proceed) => proceed,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                "Handler failed on message for '{}':'{}': {}",
                message.exchange(),
                message.routing_key(),
                reason
            );
            false
        }
    }
}

/// Ordered list of handlers evaluated left to right.
#[derive(Default, Clone)]
pub struct MessageHandlerChain {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl MessageHandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn push(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl MessageHandler for MessageHandlerChain {
    fn handle(&self, message: &EncodedMessage) -> bool {
        self.handlers
            .iter()
            .all(|handler| dispatch(handler.as_ref(), message))
    }
}
