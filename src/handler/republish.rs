use std::sync::Arc;

use tracing::error;

use super::MessageHandler;
use crate::codec::EncodedMessage;
use crate::connector::TranscodingPublisher;
use crate::retriever::BusMessageRetriever;

/// Publishes records onto the local bus. With a paired retriever, records
/// marked `do_ack` are answered with an ack signal once published.
pub struct MessageRepublisher {
    publisher: Arc<TranscodingPublisher>,
    ack: Option<Arc<BusMessageRetriever>>,
}

impl MessageRepublisher {
    pub fn new(publisher: Arc<TranscodingPublisher>) -> Self {
        Self {
            publisher,
            ack: None,
        }
    }

    pub fn with_ack(publisher: Arc<TranscodingPublisher>, ack: Arc<BusMessageRetriever>) -> Self {
        Self {
            publisher,
            ack: Some(ack),
        }
    }
}

impl MessageHandler for MessageRepublisher {
    fn handle(&self, message: &EncodedMessage) -> bool {
        match self.publisher.publish(message) {
            Ok(()) => {
                if let Some(retriever) = &self.ack {
                    if message.do_ack {
                        retriever.send_ack(message.delivery_tag(), message.channel_id);
                    }
                }
            }
            Err(e) => error!(
                "Error while republishing message to '{}':'{}': {}",
                message.exchange(),
                message.routing_key(),
                e
            ),
        }
        true
    }
}
