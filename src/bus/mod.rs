//! The `bus` module is the seam between the relay and a message-bus broker.
//!
//! The relay only ever talks to a broker through the three traits defined
//! here: a `BrokerClient` that opens connections, a `BrokerConnection` that
//! hands out channels, and a `BrokerChannel` carrying the queue, exchange,
//! consume, ack and publish primitives. `MemoryBroker` is an in-process
//! implementation used by the binary and by the tests.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::utils::error::BusError;

pub use memory::MemoryBroker;

/// Header table carried on a message, ordered by name.
pub type Headers = BTreeMap<String, String>;

/// Callback invoked for every delivery of a consumer. It runs on a
/// broker-owned thread and may call back into the channel.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Exchange types the relay can forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExchangeKind {
    Direct,
    #[default]
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// Broker type text for the exchange kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(format!("invalid exchange type '{other}'")),
        }
    }
}

/// Routing information of one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
}

/// AMQP basic properties. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub app_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub delivery_mode: Option<u8>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub priority: Option<u8>,
    pub reply_to: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub headers: Option<Headers>,
}

impl BasicProperties {
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub consumer_tag: String,
    pub envelope: Envelope,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
}

/// Where and how to connect to a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Opens connections to a broker.
pub trait BrokerClient: Send + Sync {
    fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn BrokerConnection>, BusError>;
}

/// A live broker connection.
pub trait BrokerConnection: Send + Sync {
    fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BusError>;
    fn is_open(&self) -> bool;
    fn close(&self) -> Result<(), BusError>;
}

/// A broker channel. Queues are declared non-durable, non-exclusive and
/// never auto-deleted; declarations are idempotent.
pub trait BrokerChannel: Send + Sync {
    fn queue_declare(&self, queue: &str) -> Result<(), BusError>;
    fn queue_delete(&self, queue: &str) -> Result<(), BusError>;
    fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BusError>;
    fn queue_unbind(&self, queue: &str, exchange: &str, routing_key: &str)
    -> Result<(), BusError>;
    fn exchange_declare(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BusError>;
    /// Limits unacknowledged deliveries for consumers started afterwards.
    fn basic_qos(&self, prefetch: u16) -> Result<(), BusError>;
    /// Starts a consumer with manual acknowledgment and returns its tag.
    fn basic_consume(&self, queue: &str, callback: DeliveryCallback) -> Result<String, BusError>;
    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BusError>;
    fn basic_ack(&self, delivery_tag: u64) -> Result<(), BusError>;
    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &BasicProperties,
        body: &[u8],
    ) -> Result<(), BusError>;
    fn is_open(&self) -> bool;
    fn close(&self) -> Result<(), BusError>;
}
