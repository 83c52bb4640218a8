use std::sync::Arc;

use tracing::warn;

use super::MessageHandler;
use crate::codec::EncodedMessage;
use crate::retriever::BusMessageRetriever;

/// Starts forwarding a message's reply-to queue back to the peer, then
/// passes the message on.
pub struct ReplyToHandler {
    retriever: Arc<BusMessageRetriever>,
    full_ack: bool,
}

impl ReplyToHandler {
    pub fn new(retriever: Arc<BusMessageRetriever>) -> Self {
        Self::with_full_ack(retriever, true)
    }

    pub fn with_full_ack(retriever: Arc<BusMessageRetriever>, full_ack: bool) -> Self {
        Self {
            retriever,
            full_ack,
        }
    }
}

impl MessageHandler for ReplyToHandler {
    fn handle(&self, message: &EncodedMessage) -> bool {
        if let Some(reply_to) = message.reply_to() {
            if let Err(e) = self
                .retriever
                .add_target_queue(reply_to, true, self.full_ack)
            {
                warn!("Unable to forward reply-to queue '{}': {}", reply_to, e);
            }
        }
        true
    }
}
