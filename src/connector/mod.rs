//! The `connector` module owns named connections to a broker.
//!
//! A [`BusConnector`] lazily opens its broker connection and a shared
//! control channel, and caches one retriever per client plus a single
//! publisher. [`BusRegistry`] maps connector names to connectors and owns
//! their lifecycle.

pub mod connector;
pub mod publisher;
pub mod registry;

pub use connector::{BusConnector, ConnectorCore};
pub use publisher::TranscodingPublisher;
pub use registry::{BusRegistry, parse_host_spec};

/// Name of the connector used when none is configured.
pub const DEFAULT_CONNECTOR: &str = "DEFAULT";

#[cfg(test)]
mod tests;
