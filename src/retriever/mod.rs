//! The `retriever` module pulls messages from a client's target queues in
//! bounded chunks.
//!
//! One [`BusMessageRetriever`] exists per client on a connector. Each
//! `retrieve` call streams at most `limit` messages (replaying anything
//! buffered by the previous call first) or waits at most `timeout`.
//! Messages that arrive after a call has ended are buffered for the next.

pub mod retriever;

use std::sync::Arc;
use std::time::Duration;

use crate::handler::MessageHandler;
use crate::utils::error::RelayResult;

pub use retriever::{BusMessageRetriever, relay_queue_name};

/// Source of chunked message output, driven by the transmit loop.
pub trait MessageRetriever: Send + Sync {
    fn retrieve(
        &self,
        handler: Arc<dyn MessageHandler>,
        limit: usize,
        timeout: Duration,
    ) -> RelayResult<()>;
}

#[cfg(test)]
mod tests;
