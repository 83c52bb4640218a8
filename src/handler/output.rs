use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::MessageHandler;
use crate::codec::{EncodedMessage, encode_frame};

/// Writes each record as one length-delimited frame into a byte stream,
/// typically the body of an HTTP request or response.
pub struct StreamOutputHandler {
    sink: UnboundedSender<Bytes>,
}

impl StreamOutputHandler {
    pub fn new(sink: UnboundedSender<Bytes>) -> Self {
        Self { sink }
    }
}

impl MessageHandler for StreamOutputHandler {
    fn handle(&self, message: &EncodedMessage) -> bool {
        if self.sink.send(encode_frame(message)).is_err() {
            warn!(
                "Output stream closed, refusing message for '{}':'{}'",
                message.exchange(),
                message.routing_key()
            );
            return false;
        }
        debug!(
            "Streamed message {} for '{}':'{}'",
            message.delivery_tag(),
            message.exchange(),
            message.routing_key()
        );
        true
    }
}
