use std::sync::Arc;

use super::{AckHandler, MessageHandlerChain, MessageRepublisher, ReplyToHandler};
use crate::connector::BusConnector;
use crate::control::control_processor;
use crate::retriever::BusMessageRetriever;

/// The inbound chain: ack signals, control commands, reply-to forwarding,
/// then republishing onto `connector`.
pub fn standard_chain(
    retriever: Arc<BusMessageRetriever>,
    connector: &BusConnector,
) -> MessageHandlerChain {
    MessageHandlerChain::new()
        .add(Arc::new(AckHandler::new(retriever.clone())))
        .add(Arc::new(control_processor(retriever.clone())))
        .add(Arc::new(ReplyToHandler::new(retriever.clone())))
        .add(Arc::new(MessageRepublisher::with_ack(
            connector.publisher(),
            retriever,
        )))
}
