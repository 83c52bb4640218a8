use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::bus::{BasicProperties, BrokerChannel};
use crate::codec::{EncodedMessage, decode_properties};
use crate::connector::ConnectorCore;
use crate::utils::error::RelayResult;

/// Republishes relay records onto a connection, on a channel of its own.
pub struct TranscodingPublisher {
    core: Arc<ConnectorCore>,
    channel: Mutex<Option<Arc<dyn BrokerChannel>>>,
}

impl TranscodingPublisher {
    pub fn new(core: Arc<ConnectorCore>) -> Self {
        Self {
            core,
            channel: Mutex::new(None),
        }
    }

    /// Publishes the record to its envelope's exchange and routing key.
    pub fn publish(&self, message: &EncodedMessage) -> RelayResult<()> {
        let channel = {
            let mut slot = self.channel.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref().filter(|c| c.is_open()) {
                Some(channel) => channel.clone(),
                None => {
                    let channel = self.core.create_channel()?;
                    *slot = Some(channel.clone());
                    channel
                }
            }
        };
        let properties = message
            .properties
            .as_ref()
            .map(decode_properties)
            .unwrap_or_else(BasicProperties::default);
        let payload = message.payload.as_deref().unwrap_or_default();
        channel.basic_publish(
            message.exchange(),
            message.routing_key(),
            &properties,
            payload,
        )?;
        debug!(
            "Republished message to '{}':'{}'",
            message.exchange(),
            message.routing_key()
        );
        Ok(())
    }

    pub fn close(&self) {
        if let Some(channel) = self
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = channel.close();
        }
    }
}
