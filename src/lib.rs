//! # amqp_relay
//!
//! `amqp_relay` bridges two independent message buses over HTTP. Each side
//! runs a relay endpoint or a relay client; messages published on one bus
//! travel as length-delimited protobuf records and are republished on the
//! other, with optional end-to-end acknowledgement.
//!
//! ## Core Modules
//!
//! - `bus`: The broker capability seam and the in-process `MemoryBroker`.
//! - `codec`: Relay record schema, property transcoding and stream framing.
//! - `connector`: Named broker connections and their registry.
//! - `retriever`: Chunked retrieval of a client's target queues.
//! - `handler`: The message-processing pipeline (ack, reply-to, republish).
//! - `control`: The forwarding-control protocol.
//! - `security`: Restricts inbound relays to published destinations.
//! - `transport`: The HTTP relay endpoint and client loops.
//! - `config`: Loading settings from files and the environment.
//! - `utils`: Error types and logging setup.

pub mod bus;
pub mod codec;
pub mod config;
pub mod connector;
pub mod control;
pub mod handler;
pub mod retriever;
pub mod security;
pub mod transport;
pub mod utils;
