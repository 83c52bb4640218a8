use std::sync::Arc;
use std::time::Duration;

use amqp_relay::bus::{
    BasicProperties, BrokerChannel, BrokerClient, BrokerConnection, ConnectParams, ExchangeKind,
    MemoryBroker,
};
use amqp_relay::connector::{BusConnector, BusRegistry};
use amqp_relay::control;
use amqp_relay::transport::{RelayClient, RelayEndpoint, RelayServerState, relay_router};
use tokio::net::TcpListener;

fn channel(broker: &MemoryBroker) -> Arc<dyn BrokerChannel> {
    broker
        .connect(&ConnectParams::default())
        .expect("connect")
        .create_channel()
        .expect("channel")
}

fn open(broker: &MemoryBroker, name: &str) -> (BusRegistry, Arc<BusConnector>) {
    let registry = BusRegistry::new(Arc::new(broker.clone()));
    let connector = registry.open(name, "localhost", None).expect("open connector");
    (registry, connector)
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relay_forwards_both_directions() {
    let server_broker = MemoryBroker::new();
    let (server_registry, server_connector) = open(&server_broker, "RELAY_SERVLET_DEFAULT");
    server_connector.retriever("edge").expect("server retriever");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = relay_router("/relay", RelayServerState::new(server_connector.clone()));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    let client_broker = MemoryBroker::new();
    let (client_registry, client_connector) = open(&client_broker, "DEFAULT");
    let endpoint = RelayEndpoint::new(
        &format!("http://{addr}"),
        "edge",
        10,
        Duration::from_millis(200),
    )
    .expect("endpoint");
    let http = reqwest::Client::builder().no_proxy().build().expect("http");
    let client = RelayClient::with_http(
        &client_connector,
        "remote",
        endpoint,
        Duration::from_millis(50),
        http,
    )
    .expect("relay client");
    client.spawn();

    // Client bus asks for the server's "commands" queue
    client_connector.declare_queue("commands").expect("declare");
    let client_control = client_connector.control_channel().expect("control");
    control::request_queue_forward(client_control.as_ref(), "commands", false).expect("request");
    assert!(eventually(|| server_broker.queue_exists("commands")).await);

    // Server bus asks for the client's "telemetry" exchange
    let server_side = channel(&server_broker);
    server_side
        .exchange_declare("telemetry", ExchangeKind::Fanout)
        .expect("exchange");
    server_side.queue_declare("telemetry.sink").expect("sink");
    server_side
        .queue_bind("telemetry.sink", "telemetry", "")
        .expect("bind");
    let server_control = server_connector.control_channel().expect("control");
    control::request_exchange_forward(
        server_control.as_ref(),
        "telemetry",
        ExchangeKind::Fanout,
        &[],
        false,
    )
    .expect("request");
    assert!(
        eventually(|| !client_broker
            .bindings("telemetry", "telemetry_RELAY_remote")
            .is_empty())
        .await
    );

    server_side
        .basic_publish("", "commands", &BasicProperties::default(), b"reboot")
        .expect("publish command");
    channel(&client_broker)
        .basic_publish("telemetry", "", &BasicProperties::default(), b"cpu=3")
        .expect("publish telemetry");

    assert!(eventually(|| client_broker.queue_depth("commands") == Some(1)).await);
    assert_eq!(
        client_broker.basic_get("commands").expect("command").body,
        b"reboot"
    );
    assert!(eventually(|| server_broker.queue_depth("telemetry.sink") == Some(1)).await);
    assert_eq!(
        server_broker
            .basic_get("telemetry.sink")
            .expect("telemetry")
            .body,
        b"cpu=3"
    );

    client.stop_handle().stop();
    client_registry.close_all();
    server_registry.close_all();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unrequested_destinations_are_not_relayed() {
    let server_broker = MemoryBroker::new();
    let (_server_registry, server_connector) = open(&server_broker, "RELAY_SERVLET_DEFAULT");
    let server_side = channel(&server_broker);
    server_side.queue_declare("admin").expect("declare");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = relay_router("/relay", RelayServerState::new(server_connector));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    let client_broker = MemoryBroker::new();
    let (_client_registry, client_connector) = open(&client_broker, "DEFAULT");
    let endpoint = RelayEndpoint::new(
        &format!("http://{addr}/relay"),
        "rogue",
        10,
        Duration::from_millis(100),
    )
    .expect("endpoint");
    let http = reqwest::Client::builder().no_proxy().build().expect("http");
    let client = RelayClient::with_http(
        &client_connector,
        "remote",
        endpoint,
        Duration::from_millis(50),
        http,
    )
    .expect("relay client");

    // The client side forwards its own "admin" queue without being asked
    let retriever = client_connector.retriever("remote").expect("retriever");
    retriever
        .add_target_queue("admin", true, false)
        .expect("target");
    channel(&client_broker)
        .basic_publish("", "admin", &BasicProperties::default(), b"drop tables")
        .expect("publish");
    client.spawn();

    assert!(eventually(|| client_broker.queue_depth("admin") == Some(0)
        && client_broker.unacked_count("admin") == 0)
    .await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server_broker.queue_depth("admin"), Some(0));

    client.stop_handle().stop();
}
