use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::bus::{BrokerChannel, BrokerClient, BrokerConnection, ConnectParams, ExchangeKind};
use crate::connector::publisher::TranscodingPublisher;
use crate::retriever::BusMessageRetriever;
use crate::utils::error::RelayResult;

/// Connection state shared by a connector, its retrievers and its publisher.
pub struct ConnectorCore {
    name: String,
    broker: Arc<dyn BrokerClient>,
    params: ConnectParams,
    state: Mutex<CoreState>,
}

#[derive(Default)]
struct CoreState {
    connection: Option<Arc<dyn BrokerConnection>>,
    control: Option<Arc<dyn BrokerChannel>>,
}

impl ConnectorCore {
    pub fn new(name: &str, broker: Arc<dyn BrokerClient>, params: ConnectParams) -> Self {
        Self {
            name: name.to_string(),
            broker,
            params,
            state: Mutex::new(CoreState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_connection(&self, state: &mut CoreState) -> RelayResult<Arc<dyn BrokerConnection>> {
        if let Some(connection) = state.connection.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }
        if state.connection.is_some() {
            warn!("Connection '{}' was closed, reconnecting", self.name);
        }
        let connection = self.broker.connect(&self.params)?;
        info!(
            "Connector '{}' connected to broker at {}",
            self.name, self.params.host
        );
        state.connection = Some(connection.clone());
        Ok(connection)
    }

    /// The broker connection, reconnecting if it was closed.
    pub fn connection(&self) -> RelayResult<Arc<dyn BrokerConnection>> {
        let mut state = self.lock();
        self.open_connection(&mut state)
    }

    /// Opens a fresh channel on the connection.
    pub fn create_channel(&self) -> RelayResult<Arc<dyn BrokerChannel>> {
        Ok(self.connection()?.create_channel()?)
    }

    /// The shared control channel, recreated if it was closed.
    pub fn control_channel(&self) -> RelayResult<Arc<dyn BrokerChannel>> {
        let mut state = self.lock();
        if let Some(channel) = state.control.as_ref().filter(|c| c.is_open()) {
            return Ok(channel.clone());
        }
        let channel = self.open_connection(&mut state)?.create_channel()?;
        state.control = Some(channel.clone());
        Ok(channel)
    }

    pub fn declare_queue(&self, queue: &str) -> RelayResult<()> {
        self.control_channel()?.queue_declare(queue)?;
        Ok(())
    }

    pub fn remove_queue(&self, queue: &str) -> RelayResult<()> {
        self.control_channel()?.queue_delete(queue)?;
        Ok(())
    }

    /// Declares `exchange` and a relay queue bound to it with each binding,
    /// or with the empty key when there are none.
    pub fn declare_exchange_relay(
        &self,
        exchange: &str,
        relay_queue: &str,
        kind: ExchangeKind,
        bindings: &[String],
    ) -> RelayResult<()> {
        let channel = self.control_channel()?;
        channel.exchange_declare(exchange, kind)?;
        channel.queue_declare(relay_queue)?;
        if bindings.is_empty() {
            channel.queue_bind(relay_queue, exchange, "")?;
        } else {
            for binding in bindings {
                channel.queue_bind(relay_queue, exchange, binding)?;
            }
        }
        debug!(
            "Relay queue '{}' bound to {} exchange '{}'",
            relay_queue, kind, exchange
        );
        Ok(())
    }

    /// Reverses the bindings made by [`ConnectorCore::declare_exchange_relay`].
    pub fn remove_exchange_relay(
        &self,
        exchange: &str,
        relay_queue: &str,
        bindings: &[String],
    ) -> RelayResult<()> {
        let channel = self.control_channel()?;
        if bindings.is_empty() {
            channel.queue_unbind(relay_queue, exchange, "")?;
        } else {
            for binding in bindings {
                channel.queue_unbind(relay_queue, exchange, binding)?;
            }
        }
        Ok(())
    }

    /// Closes the control channel and the connection.
    pub fn close(&self) {
        let mut state = self.lock();
        if let Some(channel) = state.control.take().filter(|c| c.is_open()) {
            if let Err(e) = channel.close() {
                warn!("Failed to close control channel of '{}': {}", self.name, e);
            }
        }
        if let Some(connection) = state.connection.take() {
            if let Err(e) = connection.close() {
                error!("Failed to close connection '{}': {}", self.name, e);
            }
        }
    }
}

/// A named broker connection with its per-client retrievers and its
/// publisher.
pub struct BusConnector {
    core: Arc<ConnectorCore>,
    retrievers: Mutex<HashMap<String, Arc<BusMessageRetriever>>>,
    publisher: Mutex<Option<Arc<TranscodingPublisher>>>,
}

impl BusConnector {
    pub fn new(name: &str, broker: Arc<dyn BrokerClient>, params: ConnectParams) -> Self {
        Self {
            core: Arc::new(ConnectorCore::new(name, broker, params)),
            retrievers: Mutex::new(HashMap::new()),
            publisher: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn core(&self) -> &Arc<ConnectorCore> {
        &self.core
    }

    /// The retriever for `client_id`, created (and its control queue bound)
    /// on first use.
    pub fn retriever(&self, client_id: &str) -> RelayResult<Arc<BusMessageRetriever>> {
        let mut retrievers = self.retrievers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(retriever) = retrievers.get(client_id) {
            return Ok(retriever.clone());
        }
        let retriever = BusMessageRetriever::new(client_id, self.core.clone())?;
        retrievers.insert(client_id.to_string(), retriever.clone());
        info!(
            "Created retriever for client '{}' on connector '{}'",
            client_id,
            self.name()
        );
        Ok(retriever)
    }

    pub fn retriever_ids(&self) -> Vec<String> {
        let retrievers = self.retrievers.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = retrievers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn publisher(&self) -> Arc<TranscodingPublisher> {
        self.publisher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert_with(|| Arc::new(TranscodingPublisher::new(self.core.clone())))
            .clone()
    }

    pub fn connection(&self) -> RelayResult<Arc<dyn BrokerConnection>> {
        self.core.connection()
    }

    pub fn control_channel(&self) -> RelayResult<Arc<dyn BrokerChannel>> {
        self.core.control_channel()
    }

    pub fn declare_queue(&self, queue: &str) -> RelayResult<()> {
        self.core.declare_queue(queue)
    }

    pub fn remove_queue(&self, queue: &str) -> RelayResult<()> {
        self.core.remove_queue(queue)
    }

    pub fn declare_exchange_relay(
        &self,
        exchange: &str,
        relay_queue: &str,
        kind: ExchangeKind,
        bindings: &[String],
    ) -> RelayResult<()> {
        self.core
            .declare_exchange_relay(exchange, relay_queue, kind, bindings)
    }

    pub fn remove_exchange_relay(
        &self,
        exchange: &str,
        relay_queue: &str,
        bindings: &[String],
    ) -> RelayResult<()> {
        self.core
            .remove_exchange_relay(exchange, relay_queue, bindings)
    }

    /// Disposes every retriever, then closes the publisher, the control
    /// channel and the connection.
    pub fn shutdown(&self) {
        let retrievers: Vec<Arc<BusMessageRetriever>> = self
            .retrievers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, r)| r)
            .collect();
        for retriever in retrievers {
            if let Err(e) = retriever.dispose() {
                warn!(
                    "Failed to dispose retriever for client '{}': {}",
                    retriever.client_id(),
                    e
                );
            }
        }
        if let Some(publisher) = self
            .publisher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            publisher.close();
        }
        self.core.close();
        info!("Connector '{}' shut down", self.name());
    }
}
