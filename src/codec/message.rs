use prost::{Enumeration, Message};

use crate::bus::{Delivery, ExchangeKind};

use super::properties::encode_properties;

/// Routing information of a relayed delivery.
#[derive(Clone, PartialEq, Message)]
pub struct EncodedEnvelope {
    #[prost(uint64, tag = "1")]
    pub delivery_tag: u64,
    #[prost(string, tag = "2")]
    pub exchange: String,
    #[prost(string, tag = "3")]
    pub routing_key: String,
    #[prost(bool, tag = "4")]
    pub is_redeliver: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// AMQP basic properties in wire form. The timestamp is epoch milliseconds.
#[derive(Clone, PartialEq, Message)]
pub struct EncodedProperties {
    #[prost(string, optional, tag = "1")]
    pub app_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub content_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub content_encoding: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub correlation_id: Option<String>,
    #[prost(uint32, optional, tag = "5")]
    pub delivery_mode: Option<u32>,
    #[prost(string, optional, tag = "6")]
    pub expiration: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub message_id: Option<String>,
    #[prost(uint32, optional, tag = "8")]
    pub priority: Option<u32>,
    #[prost(string, optional, tag = "9")]
    pub reply_to: Option<String>,
    #[prost(int64, optional, tag = "10")]
    pub timestamp: Option<i64>,
    #[prost(string, optional, tag = "11")]
    pub message_type: Option<String>,
    #[prost(string, optional, tag = "12")]
    pub user_id: Option<String>,
    #[prost(message, repeated, tag = "13")]
    pub headers: Vec<Header>,
}

/// The unit carried over the relay transport.
#[derive(Clone, PartialEq, Message)]
pub struct EncodedMessage {
    #[prost(message, required, tag = "1")]
    pub envelope: EncodedEnvelope,
    #[prost(message, optional, tag = "2")]
    pub properties: Option<EncodedProperties>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
    /// The receiving side must send an ack signal back once it has
    /// republished this message.
    #[prost(bool, tag = "4")]
    pub do_ack: bool,
    /// Channel epoch of the retriever that produced the message.
    #[prost(int32, tag = "5")]
    pub channel_id: i32,
}

impl EncodedMessage {
    /// Encodes a live bus delivery. When `full_ack` is set the record is
    /// stamped with `do_ack` and the producing channel epoch.
    pub fn from_delivery(delivery: &Delivery, full_ack: bool, channel_id: i32) -> Self {
        let envelope = &delivery.envelope;
        Self {
            envelope: EncodedEnvelope {
                delivery_tag: envelope.delivery_tag,
                exchange: envelope.exchange.clone(),
                routing_key: envelope.routing_key.clone(),
                is_redeliver: envelope.redelivered,
            },
            properties: Some(encode_properties(&delivery.properties)),
            payload: Some(delivery.body.clone()),
            do_ack: full_ack,
            channel_id: if full_ack { channel_id } else { 0 },
        }
    }

    /// A record addressed to a reserved pseudo-destination and carrying no
    /// properties.
    pub fn signal(destination: &str, delivery_tag: u64, channel_id: i32) -> Self {
        Self {
            envelope: EncodedEnvelope {
                delivery_tag,
                exchange: destination.to_string(),
                routing_key: destination.to_string(),
                is_redeliver: false,
            },
            properties: None,
            payload: None,
            do_ack: false,
            channel_id,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.envelope.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.envelope.routing_key
    }

    pub fn delivery_tag(&self) -> u64 {
        self.envelope.delivery_tag
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.reply_to.as_deref())
            .filter(|r| !r.is_empty())
    }
}

/// Forwarding-configuration command carried in a control record payload.
#[derive(Clone, PartialEq, Message)]
pub struct RelayControlMessage {
    #[prost(enumeration = "Command", tag = "1")]
    pub command: i32,
    #[prost(string, optional, tag = "2")]
    pub endpoint_name: Option<String>,
    #[prost(enumeration = "EndpointType", optional, tag = "3")]
    pub endpoint_type: Option<i32>,
    #[prost(string, repeated, tag = "4")]
    pub bindings: Vec<String>,
    #[prost(bool, tag = "5")]
    pub full_ack: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Command {
    Publish = 0,
    Unpublish = 1,
    UnpublishAll = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum EndpointType {
    Queue = 0,
    Direct = 1,
    Fanout = 2,
    Topic = 3,
    Headers = 4,
}

impl EndpointType {
    /// Exchange kind for exchange endpoints, `None` for queues.
    pub fn exchange_kind(self) -> Option<ExchangeKind> {
        match self {
            EndpointType::Queue => None,
            EndpointType::Direct => Some(ExchangeKind::Direct),
            EndpointType::Fanout => Some(ExchangeKind::Fanout),
            EndpointType::Topic => Some(ExchangeKind::Topic),
            EndpointType::Headers => Some(ExchangeKind::Headers),
        }
    }
}

impl From<ExchangeKind> for EndpointType {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => EndpointType::Direct,
            ExchangeKind::Fanout => EndpointType::Fanout,
            ExchangeKind::Topic => EndpointType::Topic,
            ExchangeKind::Headers => EndpointType::Headers,
        }
    }
}
