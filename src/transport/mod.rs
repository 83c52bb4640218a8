//! The `transport` module carries relay records over HTTP.
//!
//! The server side exposes one endpoint: `GET` streams a chunk of the
//! client's retriever output, `POST` feeds the request body into the inbound
//! handler chain. The client side runs a receive loop (long-poll `GET`) and
//! a transmit loop (streamed `POST`), both retrying after a fixed pause on
//! any failure until stopped.

pub mod client;
pub mod server;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

pub use client::{
    MessageReceiverTask, MessageTransmitterTask, RelayClient, RelayEndpoint, StopHandle,
};
pub use server::{RelayServerState, relay_router, start_relay_server};

/// Media type of relay bodies.
pub const RELAY_CONTENT_TYPE: &str = "application/x-protobuf";

/// Path used when a relay URL does not name one.
pub const DEFAULT_RELAY_PATH: &str = "/relay";

pub const DEFAULT_CHUNK_LIMIT: usize = 100;
pub const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRY_PAUSE_MS: u64 = 500;

/// Turns the receiving end of an output handler into a body stream.
///
/// `started` fires on the first poll, once the connection is ready to carry
/// the body. If the stream is dropped unpolled the sender is dropped with it,
/// so whoever waits on the other end knows nothing was written.
pub(crate) fn frame_stream(
    rx: UnboundedReceiver<Bytes>,
    started: oneshot::Sender<()>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures_util::stream::unfold((rx, Some(started)), |(mut rx, started)| async move {
        if let Some(started) = started {
            let _ = started.send(());
        }
        rx.recv().await.map(|frame| (Ok(frame), (rx, None)))
    })
}
