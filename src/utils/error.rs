//! Error types used across the relay.
//!
//! `BusError` is what a broker implementation reports through the `bus`
//! traits. `RelayError` is what the relay layer itself returns; broker
//! failures are wrapped into it so callers can decide whether to retry.

use thiserror::Error;

/// Failure reported by a message-bus broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("channel is closed")]
    ChannelClosed,
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("broker i/o failure: {0}")]
    Io(String),
}

/// Failure raised by the relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("failed to decode relay record: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to encode relay record: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("invalid host spec '{0}'")]
    InvalidHostSpec(String),
    #[error("invalid control message: {0}")]
    InvalidControl(String),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("relay endpoint answered with status {0}")]
    Status(u16),
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("unknown connector '{0}'")]
    UnknownConnector(String),
    #[error("task failed: {0}")]
    Task(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
