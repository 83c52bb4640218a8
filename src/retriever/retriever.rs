use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::MessageRetriever;
use crate::bus::{BrokerChannel, Delivery, DeliveryCallback, ExchangeKind};
use crate::codec::EncodedMessage;
use crate::connector::ConnectorCore;
use crate::control;
use crate::handler::{ACK_DESTINATION, MessageHandler, dispatch};
use crate::utils::error::RelayResult;

/// Name of the queue relaying `exchange` to `client_id`.
pub fn relay_queue_name(exchange: &str, client_id: &str) -> String {
    format!("{exchange}_RELAY_{client_id}")
}

/// Per-client chunked retrieval engine.
///
/// All mutable state sits behind one mutex. Delivery callbacks run on
/// broker threads and take the same mutex; the caller of `retrieve` only
/// blocks on the condition variable, which releases it.
///
/// The current handler is invoked while the mutex is held, so it must not
/// call back into the same retriever. A handler that returns `false` is
/// treated as a closed stream: the message is buffered and the chunk ends.
pub struct BusMessageRetriever {
    client_id: String,
    control_queue: String,
    core: Arc<ConnectorCore>,
    this: Weak<BusMessageRetriever>,
    call: Mutex<()>,
    state: Mutex<RetrieverState>,
    wake: Condvar,
}

#[derive(Default)]
struct RetrieverState {
    channel: Option<Arc<dyn BrokerChannel>>,
    channel_id: i32,
    target_queues: BTreeSet<String>,
    full_ack_queues: HashSet<String>,
    exchange_bindings: HashMap<String, BTreeSet<String>>,
    subscriptions: HashMap<String, String>,
    handler: Option<Arc<dyn MessageHandler>>,
    stream_count: usize,
    stream_limit: usize,
    terminated: bool,
    buffer: VecDeque<Buffered>,
}

impl RetrieverState {
    /// The handler of the running chunk, unless it has ended or is full.
    fn active_handler(&self) -> Option<Arc<dyn MessageHandler>> {
        if self.terminated || self.stream_count >= self.stream_limit {
            None
        } else {
            self.handler.clone()
        }
    }
}

/// A message held back until the next `retrieve` call, together with the
/// ack to issue once it has been handed over.
struct Buffered {
    message: EncodedMessage,
    ack: Option<PendingAck>,
}

#[derive(Clone, Copy)]
struct PendingAck {
    delivery_tag: u64,
    channel_id: i32,
}

impl BusMessageRetriever {
    /// Creates the retriever and binds the client's control queue to the
    /// relay control exchange.
    pub fn new(client_id: &str, core: Arc<ConnectorCore>) -> RelayResult<Arc<Self>> {
        let control_queue = control::control_queue_name(client_id);
        let retriever = Arc::new_cyclic(|this| Self {
            client_id: client_id.to_string(),
            control_queue: control_queue.clone(),
            core,
            this: this.clone(),
            call: Mutex::new(()),
            state: Mutex::new(RetrieverState {
                terminated: true,
                ..Default::default()
            }),
            wake: Condvar::new(),
        });
        retriever.add_target_queue(&control_queue, true, false)?;
        control::bind_control_queue(retriever.core.control_channel()?.as_ref(), &control_queue)?;
        Ok(retriever)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn control_queue(&self) -> &str {
        &self.control_queue
    }

    fn lock(&self) -> MutexGuard<'_, RetrieverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current channel epoch. Starts at 1 with the first channel and grows
    /// every time the channel has to be recreated.
    pub fn channel_id(&self) -> i32 {
        self.lock().channel_id
    }

    pub fn target_queues(&self) -> Vec<String> {
        self.lock().target_queues.iter().cloned().collect()
    }

    pub fn is_full_ack(&self, queue: &str) -> bool {
        self.lock().full_ack_queues.contains(queue)
    }

    pub fn exchange_bindings(&self, exchange: &str) -> Vec<String> {
        self.lock()
            .exchange_bindings
            .get(exchange)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    fn channel(&self, state: &mut RetrieverState) -> RelayResult<Arc<dyn BrokerChannel>> {
        if let Some(channel) = state.channel.as_ref().filter(|c| c.is_open()) {
            return Ok(channel.clone());
        }
        if state.channel.is_some() {
            warn!(
                "Message retrieval channel for client '{}' closed unexpectedly, reopening",
                self.client_id
            );
        }
        let channel = self.core.create_channel()?;
        channel.basic_qos(1)?;
        state.channel_id += 1;
        state.channel = Some(channel.clone());
        state.subscriptions.clear();
        Ok(channel)
    }

    /// Acks against the live channel only when it is still the epoch the
    /// delivery came from.
    fn ack_on_epoch(&self, state: &RetrieverState, ack: PendingAck) -> RelayResult<bool> {
        match state.channel.as_ref() {
            Some(channel) if state.channel_id == ack.channel_id && channel.is_open() => {
                channel.basic_ack(ack.delivery_tag)?;
                Ok(true)
            }
            _ => {
                warn!(
                    "Unable to ack message {} for client '{}': channel {} is not the current channel {}",
                    ack.delivery_tag, self.client_id, ack.channel_id, state.channel_id
                );
                Ok(false)
            }
        }
    }

    /// Replays the buffer in order, up to the chunk limit. Returns `false`
    /// if the handler refused a message, which is put back at the head of
    /// the buffer.
    fn drain_buffer(&self, state: &mut RetrieverState, handler: &dyn MessageHandler) -> bool {
        while state.stream_count < state.stream_limit {
            let Some(entry) = state.buffer.pop_front() else {
                break;
            };
            if !dispatch(handler, &entry.message) {
                state.buffer.push_front(entry);
                return false;
            }
            if let Some(ack) = entry.ack {
                debug!(
                    "Doing immediate ack for {}:{}:{}",
                    entry.message.exchange(),
                    entry.message.routing_key(),
                    ack.delivery_tag
                );
                if let Err(e) = self.ack_on_epoch(state, ack) {
                    warn!("Immediate ack of buffered message failed: {}", e);
                }
            }
            state.stream_count += 1;
        }
        true
    }

    fn subscribe(&self, state: &mut RetrieverState, channel: &Arc<dyn BrokerChannel>) {
        let epoch = state.channel_id;
        let queues: Vec<String> = state
            .target_queues
            .iter()
            .filter(|q| !state.subscriptions.contains_key(*q))
            .cloned()
            .collect();
        for queue in queues {
            if let Err(e) = channel.queue_declare(&queue) {
                warn!("Failed to declare target queue '{}': {}", queue, e);
                continue;
            }
            let this = self.this.clone();
            let source = queue.clone();
            let delivery_channel = channel.clone();
            let callback: DeliveryCallback = Arc::new(move |delivery: Delivery| {
                if let Some(retriever) = this.upgrade() {
                    retriever.on_delivery(&source, &delivery_channel, epoch, delivery);
                }
            });
            match channel.basic_consume(&queue, callback) {
                Ok(tag) => {
                    state.subscriptions.insert(queue, tag);
                }
                Err(e) => warn!("Failed to subscribe to queue '{}': {}", queue, e),
            }
        }
    }

    /// Cancels every subscription, sets the termination flag and releases
    /// the handler.
    fn finish(&self, state: &mut RetrieverState) {
        let open_channel = state.channel.clone().filter(|c| c.is_open());
        for (queue, tag) in state.subscriptions.drain() {
            if let Some(channel) = &open_channel {
                if let Err(e) = channel.basic_cancel(&tag) {
                    warn!("Failed to cancel subscription to '{}': {}", queue, e);
                }
            }
        }
        state.terminated = true;
        state.handler = None;
    }

    fn on_delivery(
        &self,
        queue: &str,
        channel: &Arc<dyn BrokerChannel>,
        epoch: i32,
        delivery: Delivery,
    ) {
        let mut state = self.lock();
        let full_ack = state.full_ack_queues.contains(queue);
        let delivery_tag = delivery.envelope.delivery_tag;
        let message = EncodedMessage::from_delivery(&delivery, full_ack, epoch);

        let ack = (!full_ack).then_some(PendingAck {
            delivery_tag,
            channel_id: epoch,
        });
        let Some(handler) = state.active_handler() else {
            // The chunk is over or full; hold the message for the next call.
            state.buffer.push_back(Buffered { message, ack });
            return;
        };

        if !dispatch(handler.as_ref(), &message) {
            warn!(
                "Output for client '{}' refused message {}, buffering until the next retrieval",
                self.client_id, delivery_tag
            );
            state.buffer.push_back(Buffered { message, ack });
            state.terminated = true;
            self.wake.notify_all();
            return;
        }
        if !full_ack {
            if let Err(e) = channel.basic_ack(delivery_tag) {
                warn!(
                    "Immediate ack of message {} from '{}' failed: {}",
                    delivery_tag, queue, e
                );
            }
        }
        state.stream_count += 1;
        if state.stream_count >= state.stream_limit {
            self.wake.notify_all();
        }
    }

    /// Streams buffered and live messages to `handler` until `limit`
    /// messages have been handed over or `timeout` has elapsed.
    pub fn retrieve(
        &self,
        handler: Arc<dyn MessageHandler>,
        limit: usize,
        timeout: Duration,
    ) -> RelayResult<()> {
        let started = Instant::now();
        let _call = self.call.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.lock();
        state.handler = Some(handler.clone());
        state.stream_count = 0;
        state.stream_limit = limit;
        state.terminated = false;

        let channel = match self.channel(&mut state) {
            Ok(channel) => channel,
            Err(e) => {
                self.finish(&mut state);
                return Err(e);
            }
        };

        if !self.drain_buffer(&mut state, handler.as_ref()) {
            warn!(
                "Output for client '{}' refused a buffered message, ending retrieval",
                self.client_id
            );
            self.finish(&mut state);
            return Ok(());
        }
        if state.target_queues.is_empty() || state.stream_count >= state.stream_limit {
            self.finish(&mut state);
            return Ok(());
        }

        self.subscribe(&mut state, &channel);

        let remaining = timeout.saturating_sub(started.elapsed());
        if !remaining.is_zero() {
            let (guard, _) = self
                .wake
                .wait_timeout_while(state, remaining, |s| {
                    !s.terminated && s.stream_count < s.stream_limit
                })
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        debug!(
            "Retrieval for client '{}' delivered {} message(s)",
            self.client_id, state.stream_count
        );
        self.finish(&mut state);
        Ok(())
    }

    /// Adds a queue to the target set. `declare` also declares it on the
    /// broker; `full_ack` defers its acks to the remote side.
    pub fn add_target_queue(&self, queue: &str, declare: bool, full_ack: bool) -> RelayResult<()> {
        let mut state = self.lock();
        if declare {
            self.core.declare_queue(queue)?;
        }
        state.target_queues.insert(queue.to_string());
        if full_ack {
            state.full_ack_queues.insert(queue.to_string());
        } else {
            state.full_ack_queues.remove(queue);
        }
        info!(
            "Client '{}' now relays queue '{}' (full ack: {})",
            self.client_id, queue, full_ack
        );
        Ok(())
    }

    fn cancel_subscription(&self, state: &mut RetrieverState, queue: &str) {
        if let Some(tag) = state.subscriptions.remove(queue) {
            if let Some(channel) = state.channel.as_ref().filter(|c| c.is_open()) {
                if let Err(e) = channel.basic_cancel(&tag) {
                    warn!("Failed to cancel subscription to '{}': {}", queue, e);
                }
            }
        }
    }

    /// Removes a queue from the target set. The control queue cannot be
    /// removed; `Ok(false)` is returned for it.
    pub fn remove_target_queue(&self, queue: &str, remove_endpoint: bool) -> RelayResult<bool> {
        if queue == self.control_queue {
            warn!(
                "Refusing to remove control queue '{}' of client '{}'",
                queue, self.client_id
            );
            return Ok(false);
        }
        let mut state = self.lock();
        self.cancel_subscription(&mut state, queue);
        let removed = state.target_queues.remove(queue);
        state.full_ack_queues.remove(queue);
        if remove_endpoint {
            self.core.remove_queue(queue)?;
        }
        if removed {
            info!("Client '{}' stopped relaying queue '{}'", self.client_id, queue);
        }
        Ok(removed)
    }

    /// Relays `exchange` through a per-client relay queue bound with
    /// `bindings` (or the empty key).
    pub fn add_target_exchange(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        bindings: &[String],
        full_ack: bool,
    ) -> RelayResult<()> {
        let relay_queue = relay_queue_name(exchange, &self.client_id);
        {
            let mut state = self.lock();
            if !bindings.is_empty() {
                state
                    .exchange_bindings
                    .entry(exchange.to_string())
                    .or_default()
                    .extend(bindings.iter().cloned());
            }
            self.core
                .declare_exchange_relay(exchange, &relay_queue, kind, bindings)?;
        }
        self.add_target_queue(&relay_queue, false, full_ack)
    }

    /// Unbinds `bindings` from the relay queue of `exchange`. The relay
    /// queue itself is only dropped once no bindings remain (or when no
    /// bindings were given).
    pub fn remove_target_exchange(
        &self,
        exchange: &str,
        bindings: &[String],
        remove_endpoint: bool,
    ) -> RelayResult<()> {
        let relay_queue = relay_queue_name(exchange, &self.client_id);
        let remove_relay_queue = {
            let mut state = self.lock();
            self.core
                .remove_exchange_relay(exchange, &relay_queue, bindings)?;
            let remaining = match state.exchange_bindings.get_mut(exchange) {
                Some(known) if !bindings.is_empty() => {
                    for binding in bindings {
                        known.remove(binding);
                    }
                    known.len()
                }
                _ => 0,
            };
            if remaining == 0 {
                state.exchange_bindings.remove(exchange);
            }
            remaining == 0
        };
        if remove_relay_queue {
            self.remove_target_queue(&relay_queue, remove_endpoint)?;
        }
        Ok(())
    }

    /// Drops every target except the control queue. Endpoint removal
    /// failures are logged and do not stop the reset.
    pub fn remove_all_targets(&self, remove_endpoints: bool) {
        let mut state = self.lock();
        let queues: Vec<String> = state
            .target_queues
            .iter()
            .filter(|q| **q != self.control_queue)
            .cloned()
            .collect();
        for queue in &queues {
            self.cancel_subscription(&mut state, queue);
            if remove_endpoints {
                if let Err(e) = self.core.remove_queue(queue) {
                    warn!("Failed to remove queue '{}': {}", queue, e);
                }
            }
        }
        state.target_queues.clear();
        state.full_ack_queues.clear();
        state.exchange_bindings.clear();
        state.target_queues.insert(self.control_queue.clone());
        info!(
            "Client '{}' reset forwarding ({} target(s) removed)",
            self.client_id,
            queues.len()
        );
    }

    /// Queues an ack signal for the remote side, or hands it straight to the
    /// active handler.
    pub fn send_ack(&self, delivery_tag: u64, channel_id: i32) {
        let message = EncodedMessage::signal(ACK_DESTINATION, delivery_tag, channel_id);
        let mut state = self.lock();
        let delivered = match state.active_handler() {
            Some(handler) => dispatch(handler.as_ref(), &message),
            None => false,
        };
        if !delivered {
            state.buffer.push_back(Buffered { message, ack: None });
        }
    }

    /// Acks `delivery_tag` if `channel_id` is still the current channel
    /// epoch. Returns whether the ack was issued.
    pub fn do_ack(&self, delivery_tag: u64, channel_id: i32) -> RelayResult<bool> {
        let state = self.lock();
        self.ack_on_epoch(
            &state,
            PendingAck {
                delivery_tag,
                channel_id,
            },
        )
    }

    /// Closes the retrieval channel. Unacked deliveries go back to the
    /// broker.
    pub fn close(&self) -> RelayResult<()> {
        let mut state = self.lock();
        state.subscriptions.clear();
        if let Some(channel) = state.channel.take() {
            if channel.is_open() {
                channel.close()?;
            }
        }
        Ok(())
    }

    /// Closes the retriever and removes its control queue.
    pub fn dispose(&self) -> RelayResult<()> {
        self.close()?;
        let control_channel = self.core.control_channel()?;
        control::remove_control_queue(control_channel.as_ref(), &self.control_queue)?;
        debug!("Disposed retriever for client '{}'", self.client_id);
        Ok(())
    }
}

impl MessageRetriever for BusMessageRetriever {
    fn retrieve(
        &self,
        handler: Arc<dyn MessageHandler>,
        limit: usize,
        timeout: Duration,
    ) -> RelayResult<()> {
        BusMessageRetriever::retrieve(self, handler, limit, timeout)
    }
}
