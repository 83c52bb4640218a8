use std::sync::Arc;

use super::*;
use crate::bus::{
    BasicProperties, BrokerChannel, BrokerConnection, ConnectParams, Delivery, Envelope,
    MemoryBroker,
};
use crate::codec::EncodedMessage;
use crate::control::RELAY_CONTROL_EXCHANGE;
use crate::utils::error::RelayError;

fn registry(broker: &MemoryBroker) -> BusRegistry {
    BusRegistry::new(Arc::new(broker.clone()))
}

fn record(routing_key: &str, body: &[u8]) -> EncodedMessage {
    let delivery = Delivery {
        consumer_tag: "ctag".to_string(),
        envelope: Envelope {
            delivery_tag: 1,
            exchange: String::new(),
            routing_key: routing_key.to_string(),
            redelivered: false,
        },
        properties: BasicProperties::default().with_header("k", "v"),
        body: body.to_vec(),
    };
    EncodedMessage::from_delivery(&delivery, false, 1)
}

#[test]
fn test_parse_host_spec_variants() {
    assert_eq!(
        parse_host_spec("localhost", None).unwrap(),
        ConnectParams {
            host: "localhost".to_string(),
            ..Default::default()
        }
    );
    assert_eq!(
        parse_host_spec("guest@rabbit:5673", Some("secret")).unwrap(),
        ConnectParams {
            host: "rabbit".to_string(),
            port: Some(5673),
            username: Some("guest".to_string()),
            password: Some("secret".to_string()),
        }
    );
}

#[test]
fn test_parse_host_spec_rejects_bad_input() {
    assert!(matches!(
        parse_host_spec("rabbit:amqp", None),
        Err(RelayError::InvalidHostSpec(_))
    ));
    assert!(matches!(
        parse_host_spec("guest@:5672", None),
        Err(RelayError::InvalidHostSpec(_))
    ));
}

#[test]
fn test_registry_open_get_and_close() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker);

    let connector = registry.open("main", "localhost", None).unwrap();
    assert_eq!(connector.name(), "main");
    assert!(registry.get("main").is_some());
    assert!(matches!(
        registry.require("missing"),
        Err(RelayError::UnknownConnector(_))
    ));
    assert_eq!(registry.names(), vec!["main"]);

    assert!(registry.close("main"));
    assert!(!registry.close("main"));
    assert!(registry.get("main").is_none());
}

#[test]
fn test_registry_open_replaces_previous_connector() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker);

    let first = registry.open("main", "localhost", None).unwrap();
    let retriever = first.retriever("peer").unwrap();
    assert!(broker.queue_exists(retriever.control_queue()));

    let second = registry.open("main", "localhost:5672", None).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.require("main").unwrap().core().params().port, Some(5672));
    // The replaced connector disposed its retrievers
    assert!(!broker.queue_exists(retriever.control_queue()));
    assert!(first.retriever_ids().is_empty());
}

#[test]
fn test_registry_open_rejects_bad_host_spec() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker);
    assert!(registry.open("main", "host:port", None).is_err());
    assert!(registry.names().is_empty());
}

#[test]
fn test_close_all_shuts_everything_down() {
    let broker = MemoryBroker::new();
    let registry = registry(&broker);
    let connector = registry.open("a", "localhost", None).unwrap();
    registry.open("b", "localhost", None).unwrap();
    let connection = connector.connection().unwrap();

    registry.close_all();
    assert!(registry.names().is_empty());
    assert!(!connection.is_open());
}

#[test]
fn test_retrievers_are_cached_per_client() {
    let broker = MemoryBroker::new();
    let connector = registry(&broker).open("main", "localhost", None).unwrap();

    let a = connector.retriever("a").unwrap();
    let again = connector.retriever("a").unwrap();
    connector.retriever("b").unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    assert_eq!(connector.retriever_ids(), vec!["a", "b"]);
    assert_eq!(
        broker.bindings(RELAY_CONTROL_EXCHANGE, a.control_queue()),
        vec![""]
    );
}

#[test]
fn test_connection_and_control_channel_are_recreated() {
    let broker = MemoryBroker::new();
    let connector = registry(&broker).open("main", "localhost", None).unwrap();

    let connection = connector.connection().unwrap();
    let control = connector.control_channel().unwrap();
    connection.close().unwrap();
    assert!(!control.is_open());

    let reopened = connector.control_channel().unwrap();
    assert!(reopened.is_open());
    assert!(connector.connection().unwrap().is_open());
}

#[test]
fn test_publisher_republishes_and_recovers_channel() {
    let broker = MemoryBroker::new();
    let connector = registry(&broker).open("main", "localhost", None).unwrap();
    connector.declare_queue("orders").unwrap();
    let publisher = connector.publisher();
    assert!(Arc::ptr_eq(&publisher, &connector.publisher()));

    publisher.publish(&record("orders", b"one")).unwrap();
    broker.close_all_channels();
    publisher.publish(&record("orders", b"two")).unwrap();

    let first = broker.basic_get("orders").unwrap();
    let second = broker.basic_get("orders").unwrap();
    assert_eq!(first.body, b"one");
    assert_eq!(second.body, b"two");
    assert_eq!(
        first.properties.headers.unwrap().get("k").map(String::as_str),
        Some("v")
    );
}

#[test]
fn test_exchange_relay_declaration() {
    let broker = MemoryBroker::new();
    let connector = registry(&broker).open("main", "localhost", None).unwrap();

    connector
        .declare_exchange_relay("events", "events_RELAY_x", Default::default(), &[])
        .unwrap();
    assert_eq!(broker.bindings("events", "events_RELAY_x"), vec![""]);

    connector
        .remove_exchange_relay("events", "events_RELAY_x", &[])
        .unwrap();
    assert!(broker.bindings("events", "events_RELAY_x").is_empty());

    connector.remove_queue("events_RELAY_x").unwrap();
    assert!(!broker.queue_exists("events_RELAY_x"));
}
