use std::sync::Arc;

use tracing::{debug, warn};

use super::MessageHandler;
use crate::codec::EncodedMessage;
use crate::retriever::BusMessageRetriever;

/// Reserved pseudo-destination of end-to-end ack signals.
pub const ACK_DESTINATION: &str = "__relay_ack_";

pub fn is_ack_message(message: &EncodedMessage) -> bool {
    message.exchange() == ACK_DESTINATION || message.routing_key() == ACK_DESTINATION
}

/// Consumes ack signals by acking the original delivery on the paired
/// retriever.
pub struct AckHandler {
    retriever: Arc<BusMessageRetriever>,
}

impl AckHandler {
    pub fn new(retriever: Arc<BusMessageRetriever>) -> Self {
        Self { retriever }
    }
}

impl MessageHandler for AckHandler {
    fn handle(&self, message: &EncodedMessage) -> bool {
        if !is_ack_message(message) {
            return true;
        }
        match self
            .retriever
            .do_ack(message.delivery_tag(), message.channel_id)
        {
            Ok(true) => debug!("End-to-end ack for message {}", message.delivery_tag()),
            Ok(false) => {}
            Err(e) => warn!(
                "Unable to complete end-to-end ack for message {}: {}",
                message.delivery_tag(),
                e
            ),
        }
        false
    }
}
