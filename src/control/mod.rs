//! The `control` module implements the forwarding-control protocol.
//!
//! Control commands are `RelayControlMessage` payloads published to the
//! reserved fanout exchange [`RELAY_CONTROL_EXCHANGE`]. Every client's
//! control queue is bound to it, so each command reaches every retriever on
//! the bus and travels to the peer like any other relayed message.
//!
//! The receiving side decodes a command into a [`ControlRequest`] and hands
//! it to a caller-supplied action: [`control_processor`] applies it to a
//! retriever, the security module mirrors it into its authorization state.

pub mod handler;
pub mod processor;
pub mod protocol;
pub mod sender;

use crate::codec::EncodedMessage;

pub use handler::ControlMessageHandler;
pub use processor::{apply_request, control_processor};
pub use protocol::{ControlRequest, decode_request};
pub use sender::{
    bind_control_queue, create_control_exchange, remove_control_queue, request_exchange_forward,
    request_exchange_forward_cancellation, request_forward_reset, request_queue_forward,
    request_queue_forward_cancellation,
};

/// Reserved fanout exchange carrying control commands.
pub const RELAY_CONTROL_EXCHANGE: &str = "__relay_control";

/// The reserved control queue of `client_id`.
pub fn control_queue_name(client_id: &str) -> String {
    format!("{RELAY_CONTROL_EXCHANGE}_{client_id}")
}

/// A record is a control command when it came through the control exchange
/// or is addressed to a control queue.
pub fn is_control_message(message: &EncodedMessage) -> bool {
    message.exchange() == RELAY_CONTROL_EXCHANGE
        || message.routing_key().starts_with(RELAY_CONTROL_EXCHANGE)
}
