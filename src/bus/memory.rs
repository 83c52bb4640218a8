use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, warn};

use super::{
    BasicProperties, BrokerChannel, BrokerClient, BrokerConnection, ConnectParams, Delivery,
    DeliveryCallback, Envelope, ExchangeKind,
};
use crate::utils::error::BusError;

/// In-process message broker.
///
/// Supports the default exchange plus direct, fanout, topic and headers
/// exchanges (headers exchanges route like fanout), per-consumer prefetch
/// and requeue of unacknowledged messages when a channel closes. Each
/// consumer is served by its own dispatcher thread; callbacks never run
/// while the broker lock is held.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    core: Arc<BrokerCore>,
}

#[derive(Default)]
struct BrokerCore {
    state: Mutex<BrokerState>,
    signal: Condvar,
    ids: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<u64, bool>,
    channels: HashMap<u64, ChannelState>,
    consumers: HashMap<String, ConsumerState>,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct Queue {
    messages: VecDeque<QueuedMessage>,
}

#[derive(Clone)]
struct QueuedMessage {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    body: Vec<u8>,
    redelivered: bool,
}

struct ChannelState {
    connection: u64,
    open: bool,
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, Unacked>,
}

struct Unacked {
    queue: String,
    consumer_tag: String,
    message: QueuedMessage,
}

enum Dispatch {
    Deliver(Delivery),
    Idle,
    Stop,
}

struct ConsumerState {
    channel: u64,
    queue: String,
    prefetch: u16,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ready (not yet delivered) messages on a queue.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.core
            .lock()
            .queues
            .get(queue)
            .map(|q| q.messages.len())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.core.lock().queues.contains_key(queue)
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.core.lock().exchanges.get(exchange).map(|e| e.kind)
    }

    /// Routing keys binding `queue` to `exchange`.
    pub fn bindings(&self, exchange: &str, queue: &str) -> Vec<String> {
        self.core
            .lock()
            .exchanges
            .get(exchange)
            .map(|e| {
                e.bindings
                    .iter()
                    .filter(|(q, _)| q == queue)
                    .map(|(_, key)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Messages from `queue` delivered on any channel and not yet acknowledged.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.core
            .lock()
            .channels
            .values()
            .flat_map(|c| c.unacked.values())
            .filter(|u| u.queue == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.core
            .lock()
            .consumers
            .values()
            .filter(|c| c.queue == queue)
            .count()
    }

    /// Pops the next ready message of a queue without involving a consumer.
    pub fn basic_get(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.core.lock();
        let message = state.queues.get_mut(queue)?.messages.pop_front()?;
        Some(Delivery {
            consumer_tag: String::new(),
            envelope: Envelope {
                delivery_tag: 0,
                exchange: message.exchange,
                routing_key: message.routing_key,
                redelivered: message.redelivered,
            },
            properties: message.properties,
            body: message.body,
        })
    }

    /// Closes every open channel, as a broker-side failure would.
    pub fn close_all_channels(&self) {
        let mut state = self.core.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        for id in ids {
            state.close_channel(id);
        }
        drop(state);
        self.core.signal.notify_all();
    }
}

impl BrokerClient for MemoryBroker {
    fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn BrokerConnection>, BusError> {
        let id = self.core.next_id();
        self.core.lock().connections.insert(id, true);
        debug!("Memory broker connection {} opened for {}", id, params.host);
        Ok(Arc::new(MemoryConnection {
            core: self.core.clone(),
            id,
        }))
    }
}

impl BrokerCore {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl BrokerState {
    fn open_channel(&self, id: u64) -> Result<&ChannelState, BusError> {
        match self.channels.get(&id) {
            Some(c) if c.open => Ok(c),
            _ => Err(BusError::ChannelClosed),
        }
    }

    fn close_channel(&mut self, id: u64) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if !channel.open {
            return;
        }
        channel.open = false;
        let mut unacked: Vec<(u64, Unacked)> = channel.unacked.drain().collect();
        unacked.sort_by_key(|(tag, _)| *tag);
        // Requeue at the front, keeping original delivery order.
        for (_, entry) in unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut message = entry.message;
                message.redelivered = true;
                queue.messages.push_front(message);
            }
        }
        self.consumers.retain(|_, c| c.channel != id);
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BusError> {
        if exchange.is_empty() {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }
        let ex = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BusError::NotFound(format!("exchange '{exchange}'")))?;
        let mut targets: Vec<String> = Vec::new();
        for (queue, key) in &ex.bindings {
            let matched = match ex.kind {
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
                ExchangeKind::Direct => key == routing_key,
                ExchangeKind::Topic => topic_matches(key, routing_key),
            };
            if matched && !targets.contains(queue) {
                targets.push(queue.clone());
            }
        }
        Ok(targets)
    }

    fn next_delivery(&mut self, consumer_tag: &str) -> Dispatch {
        let Some(consumer) = self.consumers.get(consumer_tag) else {
            return Dispatch::Stop;
        };
        let (channel_id, queue_name, prefetch) =
            (consumer.channel, consumer.queue.clone(), consumer.prefetch);
        let Some(channel) = self.channels.get(&channel_id) else {
            return Dispatch::Stop;
        };
        if prefetch > 0 {
            let outstanding = channel
                .unacked
                .values()
                .filter(|u| u.consumer_tag == consumer_tag)
                .count();
            if outstanding >= prefetch as usize {
                return Dispatch::Idle;
            }
        }
        let Some(message) = self
            .queues
            .get_mut(&queue_name)
            .and_then(|q| q.messages.pop_front())
        else {
            return Dispatch::Idle;
        };
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Dispatch::Stop;
        };
        channel.next_tag += 1;
        let delivery_tag = channel.next_tag;
        channel.unacked.insert(
            delivery_tag,
            Unacked {
                queue: queue_name,
                consumer_tag: consumer_tag.to_string(),
                message: message.clone(),
            },
        );
        Dispatch::Deliver(Delivery {
            consumer_tag: consumer_tag.to_string(),
            envelope: Envelope {
                delivery_tag,
                exchange: message.exchange,
                routing_key: message.routing_key,
                redelivered: message.redelivered,
            },
            properties: message.properties,
            body: message.body,
        })
    }
}

/// Topic pattern match: `*` matches one word, `#` zero or more.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    matches(&pattern, &key)
}

struct MemoryConnection {
    core: Arc<BrokerCore>,
    id: u64,
}

impl BrokerConnection for MemoryConnection {
    fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BusError> {
        let id = self.core.next_id();
        let mut state = self.core.lock();
        if !state.connections.get(&self.id).copied().unwrap_or(false) {
            return Err(BusError::ConnectionClosed);
        }
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                open: true,
                prefetch: 0,
                next_tag: 0,
                unacked: HashMap::new(),
            },
        );
        Ok(Arc::new(MemoryChannel {
            core: self.core.clone(),
            id,
        }))
    }

    fn is_open(&self) -> bool {
        self.core
            .lock()
            .connections
            .get(&self.id)
            .copied()
            .unwrap_or(false)
    }

    fn close(&self) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.connections.insert(self.id, false);
        let channels: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, c)| c.connection == self.id)
            .map(|(id, _)| *id)
            .collect();
        for id in channels {
            state.close_channel(id);
        }
        drop(state);
        self.core.signal.notify_all();
        Ok(())
    }
}

struct MemoryChannel {
    core: Arc<BrokerCore>,
    id: u64,
}

impl MemoryChannel {
    fn dispatch(core: Arc<BrokerCore>, consumer_tag: String, callback: DeliveryCallback) {
        loop {
            let delivery = {
                let mut state = core.lock();
                loop {
                    match state.next_delivery(&consumer_tag) {
                        Dispatch::Deliver(delivery) => break delivery,
                        Dispatch::Stop => return,
                        Dispatch::Idle => {
                            state = core
                                .signal
                                .wait(state)
                                .unwrap_or_else(|e| e.into_inner());
                        }
                    }
                }
            };
            callback(delivery);
        }
    }
}

impl BrokerChannel for MemoryChannel {
    fn queue_declare(&self, queue: &str) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn queue_delete(&self, queue: &str) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        state.queues.remove(queue);
        state.consumers.retain(|_, c| c.queue != queue);
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|(q, _)| q != queue);
        }
        drop(state);
        self.core.signal.notify_all();
        Ok(())
    }

    fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        if !state.queues.contains_key(queue) {
            return Err(BusError::NotFound(format!("queue '{queue}'")));
        }
        let ex = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::NotFound(format!("exchange '{exchange}'")))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !ex.bindings.contains(&binding) {
            ex.bindings.push(binding);
        }
        Ok(())
    }

    fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        if let Some(ex) = state.exchanges.get_mut(exchange) {
            ex.bindings.retain(|(q, k)| !(q == queue && k == routing_key));
        }
        Ok(())
    }

    fn exchange_declare(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        match state.exchanges.get(exchange) {
            Some(existing) if existing.kind != kind => Err(BusError::PreconditionFailed(format!(
                "exchange '{exchange}' already declared as {}",
                existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    exchange.to_string(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn basic_qos(&self, prefetch: u16) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = prefetch;
        }
        Ok(())
    }

    fn basic_consume(&self, queue: &str, callback: DeliveryCallback) -> Result<String, BusError> {
        let mut state = self.core.lock();
        let prefetch = state.open_channel(self.id)?.prefetch;
        if !state.queues.contains_key(queue) {
            return Err(BusError::NotFound(format!("queue '{queue}'")));
        }
        let tag = format!("amq.ctag-{}", uuid::Uuid::new_v4());
        state.consumers.insert(
            tag.clone(),
            ConsumerState {
                channel: self.id,
                queue: queue.to_string(),
                prefetch,
            },
        );
        drop(state);

        let core = self.core.clone();
        let consumer_tag = tag.clone();
        let spawned = thread::Builder::new()
            .name(format!("consumer-{queue}"))
            .spawn(move || MemoryChannel::dispatch(core, consumer_tag, callback));
        if let Err(e) = spawned {
            self.core.lock().consumers.remove(&tag);
            return Err(BusError::Io(e.to_string()));
        }
        Ok(tag)
    }

    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        state.consumers.remove(consumer_tag);
        drop(state);
        self.core.signal.notify_all();
        Ok(())
    }

    fn basic_ack(&self, delivery_tag: u64) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        let removed = state
            .channels
            .get_mut(&self.id)
            .and_then(|c| c.unacked.remove(&delivery_tag));
        drop(state);
        match removed {
            Some(_) => {
                self.core.signal.notify_all();
                Ok(())
            }
            None => {
                warn!("Ack for unknown delivery tag {}", delivery_tag);
                Err(BusError::PreconditionFailed(format!(
                    "unknown delivery tag {delivery_tag}"
                )))
            }
        }
    }

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &BasicProperties,
        body: &[u8],
    ) -> Result<(), BusError> {
        let mut state = self.core.lock();
        state.open_channel(self.id)?;
        let targets = state.route(exchange, routing_key)?;
        if targets.is_empty() {
            debug!("Dropping unroutable message for '{}':'{}'", exchange, routing_key);
        }
        let message = QueuedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
            redelivered: false,
        };
        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(message.clone());
            }
        }
        drop(state);
        self.core.signal.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        let state = self.core.lock();
        state.open_channel(self.id).is_ok()
            && state
                .channels
                .get(&self.id)
                .and_then(|c| state.connections.get(&c.connection))
                .copied()
                .unwrap_or(false)
    }

    fn close(&self) -> Result<(), BusError> {
        self.core.lock().close_channel(self.id);
        self.core.signal.notify_all();
        Ok(())
    }
}
