use prost::Message;
use tracing::info;

use super::RELAY_CONTROL_EXCHANGE;
use super::protocol::ControlRequest;
use crate::bus::{BasicProperties, BrokerChannel, ExchangeKind};
use crate::utils::error::RelayResult;

pub fn create_control_exchange(channel: &dyn BrokerChannel) -> RelayResult<()> {
    channel.exchange_declare(RELAY_CONTROL_EXCHANGE, ExchangeKind::Fanout)?;
    Ok(())
}

pub fn bind_control_queue(channel: &dyn BrokerChannel, queue: &str) -> RelayResult<()> {
    create_control_exchange(channel)?;
    channel.queue_bind(queue, RELAY_CONTROL_EXCHANGE, "")?;
    Ok(())
}

pub fn remove_control_queue(channel: &dyn BrokerChannel, queue: &str) -> RelayResult<()> {
    channel.queue_unbind(queue, RELAY_CONTROL_EXCHANGE, "")?;
    channel.queue_delete(queue)?;
    Ok(())
}

/// Publishes `request` on the control exchange.
pub fn send_request(channel: &dyn BrokerChannel, request: &ControlRequest) -> RelayResult<()> {
    let payload = request.to_control_message().encode_to_vec();
    create_control_exchange(channel)?;
    channel.basic_publish(
        RELAY_CONTROL_EXCHANGE,
        "",
        &BasicProperties::default(),
        &payload,
    )?;
    info!("Sent relay control request {:?}", request);
    Ok(())
}

/// Asks the peer to forward `queue` to this side.
pub fn request_queue_forward(
    channel: &dyn BrokerChannel,
    queue: &str,
    full_ack: bool,
) -> RelayResult<()> {
    send_request(
        channel,
        &ControlRequest::PublishQueue {
            queue: queue.to_string(),
            full_ack,
        },
    )
}

pub fn request_queue_forward_cancellation(
    channel: &dyn BrokerChannel,
    queue: &str,
) -> RelayResult<()> {
    send_request(
        channel,
        &ControlRequest::UnpublishQueue {
            queue: queue.to_string(),
        },
    )
}

/// Asks the peer to forward `exchange` (bound with `bindings`, or the empty
/// key) to this side.
pub fn request_exchange_forward(
    channel: &dyn BrokerChannel,
    exchange: &str,
    kind: ExchangeKind,
    bindings: &[String],
    full_ack: bool,
) -> RelayResult<()> {
    send_request(
        channel,
        &ControlRequest::PublishExchange {
            exchange: exchange.to_string(),
            kind,
            bindings: bindings.to_vec(),
            full_ack,
        },
    )
}

pub fn request_exchange_forward_cancellation(
    channel: &dyn BrokerChannel,
    exchange: &str,
    bindings: &[String],
) -> RelayResult<()> {
    send_request(
        channel,
        &ControlRequest::UnpublishExchange {
            exchange: exchange.to_string(),
            bindings: bindings.to_vec(),
        },
    )
}

/// Cancels every forward previously requested.
pub fn request_forward_reset(channel: &dyn BrokerChannel) -> RelayResult<()> {
    send_request(channel, &ControlRequest::UnpublishAll)
}
