use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::*;
use crate::bus::{
    BasicProperties, BrokerChannel, ConnectParams, ExchangeKind, MemoryBroker,
};
use crate::codec::EncodedMessage;
use crate::connector::BusConnector;
use crate::handler::{ACK_DESTINATION, MessageHandler, is_ack_message};

const LONG: Duration = Duration::from_secs(5);

fn connector(broker: &MemoryBroker) -> BusConnector {
    BusConnector::new(
        "test",
        Arc::new(broker.clone()),
        ConnectParams {
            host: "localhost".to_string(),
            ..Default::default()
        },
    )
}

fn publish(connector: &BusConnector, exchange: &str, routing_key: &str, body: &str) {
    connector
        .control_channel()
        .unwrap()
        .basic_publish(
            exchange,
            routing_key,
            &BasicProperties::default(),
            body.as_bytes(),
        )
        .unwrap();
}

/// Records every message it is handed.
#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<EncodedMessage>>>);

impl Collector {
    fn messages(&self) -> Vec<EncodedMessage> {
        self.0.lock().unwrap().clone()
    }

    fn bodies(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter(|m| !is_ack_message(m))
            .map(|m| String::from_utf8_lossy(m.payload.as_deref().unwrap_or_default()).into_owned())
            .collect()
    }
}

impl MessageHandler for Collector {
    fn handle(&self, message: &EncodedMessage) -> bool {
        self.0.lock().unwrap().push(message.clone());
        true
    }
}

fn retrieve(retriever: &BusMessageRetriever, limit: usize, timeout: Duration) -> Collector {
    let collector = Collector::default();
    retriever
        .retrieve(Arc::new(collector.clone()), limit, timeout)
        .unwrap();
    collector
}

#[test]
fn test_relay_queue_name() {
    assert_eq!(relay_queue_name("events", "edge"), "events_RELAY_edge");
}

#[test]
fn test_new_retriever_targets_its_control_queue() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();

    assert_eq!(retriever.client_id(), "edge");
    assert_eq!(retriever.control_queue(), "__relay_control_edge");
    assert_eq!(retriever.target_queues(), vec!["__relay_control_edge"]);
    assert!(!retriever.is_full_ack(retriever.control_queue()));
    assert!(broker.queue_exists("__relay_control_edge"));
    assert_eq!(retriever.channel_id(), 0);
}

#[test]
fn test_retrieve_waits_out_the_timeout_when_idle() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();

    let started = Instant::now();
    let collector = retrieve(&retriever, 5, Duration::from_millis(150));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(collector.messages().is_empty());
    assert_eq!(retriever.channel_id(), 1);
    assert_eq!(retriever.subscription_count(), 0);
}

#[test]
fn test_retrieve_returns_early_at_the_limit() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retriever.add_target_queue("orders", true, false).unwrap();
    for body in ["0", "1", "2"] {
        publish(&connector, "", "orders", body);
    }

    let started = Instant::now();
    let first = retrieve(&retriever, 2, LONG);
    assert!(started.elapsed() < LONG);
    assert_eq!(first.bodies(), vec!["0", "1"]);
    assert!(first.messages().iter().all(|m| !m.do_ack));

    let second = retrieve(&retriever, 5, Duration::from_millis(200));
    assert_eq!(second.bodies(), vec!["2"]);
    assert_eq!(broker.queue_depth("orders"), Some(0));
    assert_eq!(broker.unacked_count("orders"), 0);
}

#[test]
fn test_full_ack_defers_the_broker_ack() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retriever.add_target_queue("orders", true, true).unwrap();
    publish(&connector, "", "orders", "payload");

    let collector = retrieve(&retriever, 1, LONG);
    let messages = collector.messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert!(message.do_ack);
    assert_eq!(message.channel_id, retriever.channel_id());
    assert_eq!(broker.unacked_count("orders"), 1);

    assert!(!retriever.do_ack(message.delivery_tag(), 99).unwrap());
    assert_eq!(broker.unacked_count("orders"), 1);
    assert!(
        retriever
            .do_ack(message.delivery_tag(), message.channel_id)
            .unwrap()
    );
    assert_eq!(broker.unacked_count("orders"), 0);
}

#[test]
fn test_lost_channel_bumps_epoch_and_redelivers() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retriever.add_target_queue("orders", true, true).unwrap();
    publish(&connector, "", "orders", "payload");

    let first = retrieve(&retriever, 1, LONG).messages();
    assert_eq!(first[0].channel_id, 1);

    broker.close_all_channels();
    assert!(!retriever.do_ack(first[0].delivery_tag(), 1).unwrap());
    assert_eq!(broker.queue_depth("orders"), Some(1));

    let second = retrieve(&retriever, 1, LONG).messages();
    assert_eq!(retriever.channel_id(), 2);
    assert_eq!(second.len(), 1);
    assert!(second[0].envelope.is_redeliver);
    assert_eq!(second[0].channel_id, 2);
    assert!(retriever.do_ack(second[0].delivery_tag(), 2).unwrap());
}

#[test]
fn test_refused_message_is_buffered_and_replayed_in_order() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retriever.add_target_queue("orders", true, false).unwrap();
    publish(&connector, "", "orders", "a");
    publish(&connector, "", "orders", "b");

    let started = Instant::now();
    retriever
        .retrieve(Arc::new(|_: &EncodedMessage| false), 10, LONG)
        .unwrap();
    assert!(started.elapsed() < LONG);
    assert_eq!(retriever.buffered_len(), 1);

    let collector = retrieve(&retriever, 2, LONG);
    assert_eq!(collector.bodies(), vec!["a", "b"]);
    assert_eq!(retriever.buffered_len(), 0);
    assert_eq!(broker.unacked_count("orders"), 0);
}

#[test]
fn test_buffer_drain_respects_the_limit() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    for tag in 1..=3 {
        retriever.send_ack(tag, 1);
    }
    assert_eq!(retriever.buffered_len(), 3);

    let started = Instant::now();
    let collector = retrieve(&retriever, 2, LONG);
    assert!(started.elapsed() < LONG);
    let tags: Vec<u64> = collector.messages().iter().map(|m| m.delivery_tag()).collect();
    assert_eq!(tags, vec![1, 2]);
    assert_eq!(retriever.buffered_len(), 1);
    assert!(
        collector
            .messages()
            .iter()
            .all(|m| m.exchange() == ACK_DESTINATION)
    );
}

#[test]
fn test_control_queue_cannot_be_removed() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retriever.add_target_queue("orders", true, false).unwrap();

    assert!(
        !retriever
            .remove_target_queue(retriever.control_queue(), true)
            .unwrap()
    );
    assert!(broker.queue_exists(retriever.control_queue()));

    retriever.remove_all_targets(true);
    assert_eq!(retriever.target_queues(), vec!["__relay_control_edge"]);
    assert!(broker.queue_exists(retriever.control_queue()));
    assert!(!broker.queue_exists("orders"));
}

#[test]
fn test_repeated_publish_is_idempotent() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();

    retriever.add_target_queue("orders", true, true).unwrap();
    retriever.add_target_queue("orders", true, true).unwrap();
    assert_eq!(retriever.target_queues(), vec!["__relay_control_edge", "orders"]);
    assert!(retriever.is_full_ack("orders"));

    retriever.add_target_queue("orders", true, false).unwrap();
    assert!(!retriever.is_full_ack("orders"));

    assert!(retriever.remove_target_queue("orders", false).unwrap());
    assert!(!retriever.remove_target_queue("orders", false).unwrap());
    assert!(broker.queue_exists("orders"));
}

#[test]
fn test_exchange_targets_track_bindings() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    let relay_queue = relay_queue_name("events", "edge");
    let bindings = vec!["a.*".to_string(), "b.*".to_string()];

    retriever
        .add_target_exchange("events", ExchangeKind::Topic, &bindings, false)
        .unwrap();
    assert!(retriever.target_queues().contains(&relay_queue));
    assert_eq!(retriever.exchange_bindings("events"), bindings);

    publish(&connector, "events", "a.created", "routed");
    publish(&connector, "events", "c.created", "unrouted");
    let collector = retrieve(&retriever, 1, LONG);
    let messages = collector.messages();
    assert_eq!(messages[0].exchange(), "events");
    assert_eq!(messages[0].routing_key(), "a.created");

    retriever
        .remove_target_exchange("events", &bindings[..1], true)
        .unwrap();
    assert!(retriever.target_queues().contains(&relay_queue));
    assert_eq!(retriever.exchange_bindings("events"), vec!["b.*"]);

    retriever
        .remove_target_exchange("events", &bindings[1..], true)
        .unwrap();
    assert!(!retriever.target_queues().contains(&relay_queue));
    assert!(retriever.exchange_bindings("events").is_empty());
    assert!(!broker.queue_exists(&relay_queue));
}

#[test]
fn test_send_ack_reaches_the_next_chunk() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();

    retriever.send_ack(7, 3);
    let collector = retrieve(&retriever, 5, Duration::from_millis(100));
    let messages = collector.messages();
    assert_eq!(messages.len(), 1);
    assert!(is_ack_message(&messages[0]));
    assert_eq!(messages[0].delivery_tag(), 7);
    assert_eq!(messages[0].channel_id, 3);
    assert_eq!(retriever.buffered_len(), 0);
}

#[test]
fn test_dispose_removes_the_control_queue() {
    let broker = MemoryBroker::new();
    let connector = connector(&broker);
    let retriever = connector.retriever("edge").unwrap();
    retrieve(&retriever, 1, Duration::from_millis(10));

    retriever.dispose().unwrap();
    assert!(!broker.queue_exists("__relay_control_edge"));
    assert!(broker.bindings("__relay_control", "__relay_control_edge").is_empty());
}
