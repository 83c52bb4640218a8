use prost::Message;

use crate::bus::ExchangeKind;
use crate::codec::{Command, EncodedMessage, EndpointType, RelayControlMessage};
use crate::utils::error::{RelayError, RelayResult};

/// A decoded forwarding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    PublishQueue {
        queue: String,
        full_ack: bool,
    },
    PublishExchange {
        exchange: String,
        kind: ExchangeKind,
        bindings: Vec<String>,
        full_ack: bool,
    },
    UnpublishQueue {
        queue: String,
    },
    UnpublishExchange {
        exchange: String,
        bindings: Vec<String>,
    },
    UnpublishAll,
}

impl ControlRequest {
    /// Wire form of the request.
    pub fn to_control_message(&self) -> RelayControlMessage {
        let (command, name, endpoint_type, bindings, full_ack) = match self {
            ControlRequest::PublishQueue { queue, full_ack } => (
                Command::Publish,
                Some(queue.clone()),
                EndpointType::Queue,
                Vec::new(),
                *full_ack,
            ),
            ControlRequest::PublishExchange {
                exchange,
                kind,
                bindings,
                full_ack,
            } => (
                Command::Publish,
                Some(exchange.clone()),
                EndpointType::from(*kind),
                bindings.clone(),
                *full_ack,
            ),
            ControlRequest::UnpublishQueue { queue } => (
                Command::Unpublish,
                Some(queue.clone()),
                EndpointType::Queue,
                Vec::new(),
                true,
            ),
            ControlRequest::UnpublishExchange { exchange, bindings } => (
                Command::Unpublish,
                Some(exchange.clone()),
                EndpointType::Fanout,
                bindings.clone(),
                true,
            ),
            ControlRequest::UnpublishAll => (
                Command::UnpublishAll,
                None,
                EndpointType::Queue,
                Vec::new(),
                true,
            ),
        };
        RelayControlMessage {
            command: command as i32,
            endpoint_name: name,
            endpoint_type: Some(endpoint_type as i32),
            bindings,
            full_ack,
        }
    }
}

/// Interprets a decoded control payload.
///
/// `Ok(None)` means the command carries nothing to act on (a publish or
/// unpublish without an endpoint name).
pub fn interpret(control: &RelayControlMessage) -> RelayResult<Option<ControlRequest>> {
    let command = Command::try_from(control.command)
        .map_err(|_| RelayError::InvalidControl(format!("unknown command {}", control.command)))?;
    let endpoint_type = match control.endpoint_type {
        None => EndpointType::Queue,
        Some(raw) => EndpointType::try_from(raw)
            .map_err(|_| RelayError::InvalidControl(format!("unknown endpoint type {raw}")))?,
    };
    if command == Command::UnpublishAll {
        return Ok(Some(ControlRequest::UnpublishAll));
    }
    let Some(name) = control.endpoint_name.clone().filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let bindings = control.bindings.clone();
    let full_ack = control.full_ack;
    Ok(Some(match (command, endpoint_type.exchange_kind()) {
        (Command::Publish, None) => ControlRequest::PublishQueue {
            queue: name,
            full_ack,
        },
        (Command::Publish, Some(kind)) => ControlRequest::PublishExchange {
            exchange: name,
            kind,
            bindings,
            full_ack,
        },
        (_, None) => ControlRequest::UnpublishQueue { queue: name },
        (_, Some(_)) => ControlRequest::UnpublishExchange {
            exchange: name,
            bindings,
        },
    }))
}

/// Decodes the control command carried by `message`. A message without a
/// payload yields `Ok(None)`.
pub fn decode_request(message: &EncodedMessage) -> RelayResult<Option<ControlRequest>> {
    let Some(payload) = message.payload.as_deref() else {
        return Ok(None);
    };
    let control = RelayControlMessage::decode(payload)?;
    interpret(&control)
}
