use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::codec::EncodedMessage;
use crate::control::{ControlMessageHandler, ControlRequest, is_control_message};
use crate::handler::{MessageHandler, is_ack_message};

/// Destinations a client has published for forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEndpoints {
    pub queues: BTreeSet<String>,
    pub exchanges: BTreeSet<String>,
}

impl ClientEndpoints {
    fn apply(&mut self, request: &ControlRequest) {
        match request {
            ControlRequest::PublishQueue { queue, .. } => {
                self.queues.insert(queue.clone());
            }
            ControlRequest::PublishExchange { exchange, .. } => {
                self.exchanges.insert(exchange.clone());
            }
            ControlRequest::UnpublishQueue { queue } => {
                self.queues.remove(queue);
            }
            ControlRequest::UnpublishExchange { exchange, .. } => {
                self.exchanges.remove(exchange);
            }
            ControlRequest::UnpublishAll => {
                self.queues.clear();
                self.exchanges.clear();
            }
        }
    }
}

type EndpointTable = Arc<RwLock<HashMap<String, ClientEndpoints>>>;

/// Per-client authorization state shared by request observers and filters.
#[derive(Clone, Default)]
pub struct SecurityFilterManager {
    endpoints: EndpointTable,
}

impl SecurityFilterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer for the outbound control path of `client_id`. Control
    /// records pass through after being recorded.
    pub fn request_handler(&self, client_id: &str) -> ControlMessageHandler {
        let endpoints = self.endpoints.clone();
        let client_id = client_id.to_string();
        ControlMessageHandler::new(true, move |request| {
            let mut table = endpoints.write().unwrap_or_else(|e| e.into_inner());
            table.entry(client_id.clone()).or_default().apply(request);
            debug!("Client '{}' authorization updated by {:?}", client_id, request);
            Ok(())
        })
    }

    /// Filter for records relayed by `client_id`.
    pub fn filter(&self, client_id: &str) -> SecurityFilter {
        SecurityFilter {
            endpoints: self.endpoints.clone(),
            client_id: client_id.to_string(),
        }
    }

    /// Snapshot of what `client_id` is currently authorized for.
    pub fn endpoints(&self, client_id: &str) -> ClientEndpoints {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Drops records addressed to destinations the client has not published.
pub struct SecurityFilter {
    endpoints: EndpointTable,
    client_id: String,
}

impl MessageHandler for SecurityFilter {
    fn handle(&self, message: &EncodedMessage) -> bool {
        if is_control_message(message) || is_ack_message(message) {
            return true;
        }
        let table = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let allowed = table.get(&self.client_id);

        let exchange = message.exchange();
        if !exchange.is_empty() {
            if allowed.is_some_and(|e| e.exchanges.contains(exchange)) {
                return true;
            }
            warn!(
                "Client '{}' attempted to relay message to non-published exchange '{}'",
                self.client_id, exchange
            );
            return false;
        }

        let queue = message.routing_key();
        if !queue.is_empty() {
            if allowed.is_some_and(|e| e.queues.contains(queue)) {
                return true;
            }
            warn!(
                "Client '{}' attempted to relay message to non-published queue '{}'",
                self.client_id, queue
            );
            return false;
        }

        warn!(
            "Client '{}' sent relay message with invalid endpoint",
            self.client_id
        );
        false
    }
}
