use std::sync::Arc;

use super::handler::ControlMessageHandler;
use super::protocol::ControlRequest;
use crate::retriever::BusMessageRetriever;
use crate::utils::error::RelayResult;

/// Applies one request to a retriever's subscription set. Unpublishing
/// removes the endpoint from the broker as well.
pub fn apply_request(retriever: &BusMessageRetriever, request: &ControlRequest) -> RelayResult<()> {
    match request {
        ControlRequest::PublishQueue { queue, full_ack } => {
            retriever.add_target_queue(queue, true, *full_ack)
        }
        ControlRequest::PublishExchange {
            exchange,
            kind,
            bindings,
            full_ack,
        } => retriever.add_target_exchange(exchange, *kind, bindings, *full_ack),
        ControlRequest::UnpublishQueue { queue } => {
            retriever.remove_target_queue(queue, true).map(|_| ())
        }
        ControlRequest::UnpublishExchange { exchange, bindings } => {
            retriever.remove_target_exchange(exchange, bindings, true)
        }
        ControlRequest::UnpublishAll => {
            retriever.remove_all_targets(true);
            Ok(())
        }
    }
}

/// Terminal control stage: applies requests to `retriever` and filters the
/// control record out of the chain.
pub fn control_processor(retriever: Arc<BusMessageRetriever>) -> ControlMessageHandler {
    ControlMessageHandler::new(false, move |request| apply_request(&retriever, request))
}
