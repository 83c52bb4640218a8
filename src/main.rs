//! CLI for the AMQP relay
//!
//! Subcommands:
//! - `server`: run the relay endpoint in front of the local bus
//! - `client`: run the relay loops against a remote relay endpoint
//!
//! Both subcommands run over the in-process `MemoryBroker`. The host spec is
//! parsed and recorded but no external broker is dialled; embedders plug a
//! real broker in through `BusRegistry::new` with their own `BrokerClient`.

use std::sync::Arc;
use std::time::Duration;

use amqp_relay::bus::{ExchangeKind, MemoryBroker};
use amqp_relay::config::{Settings, load_config};
use amqp_relay::connector::{BusRegistry, DEFAULT_CONNECTOR};
use amqp_relay::control;
use amqp_relay::transport::{RelayClient, RelayEndpoint, RelayServerState, start_relay_server};
use amqp_relay::utils::logging;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "amqp-relay")]
enum Command {
    /// Start the relay endpoint in front of an in-process bus
    ///
    /// The bus is a `MemoryBroker`; `bus.*` settings name the connector but do
    /// not dial an external broker.
    Server,
    /// Run the relay client for an in-process bus against a relay endpoint
    Client {
        /// Relay endpoint URL (default from configuration)
        #[arg(long)]
        url: Option<String>,
        /// Client id announced to the endpoint (default: random)
        #[arg(long)]
        client_id: Option<String>,
        /// Local broker host spec, `[user@]host[:port]`; recorded on the
        /// in-process bus, no external broker is contacted
        #[arg(long)]
        broker: Option<String>,
        /// Queue to request from the remote side, may be repeated
        #[arg(long = "forward-queue")]
        forward_queues: Vec<String>,
        /// Fanout exchange to request from the remote side, may be repeated
        #[arg(long = "forward-exchange")]
        forward_exchanges: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logging::init("info");

    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client {
            url,
            client_id,
            broker,
            forward_queues,
            forward_exchanges,
        } => {
            let mut config = match load_config() {
                Ok(config) => config,
                Err(e) => {
                    error!("Client failed: {}", e);
                    return;
                }
            };
            if let Some(url) = url {
                config.client.url = url;
            }
            if client_id.is_some() {
                config.client.client_id = client_id;
            }
            if let Some(broker) = broker {
                config.client.broker = broker;
            }
            if let Err(e) = run_client(config, &forward_queues, &forward_exchanges).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let registry = BusRegistry::new(Arc::new(MemoryBroker::new()));
    info!("Serving an in-process bus for '{}'", config.bus.host_spec());
    let connector = registry.open(
        &config.bus.connector_name,
        &config.bus.host_spec(),
        config.bus.password.as_deref(),
    )?;
    let mut state = RelayServerState::new(connector);
    state.default_chunk_limit = config.relay.chunk_limit;
    state.default_chunk_timeout = Duration::from_millis(config.relay.chunk_timeout_ms);

    tokio::select! {
        result = start_relay_server(&addr, &config.server.path, state) => {
            if let Err(e) = result {
                error!("Relay endpoint exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    registry.close_all();
    Ok(())
}

async fn run_client(
    config: Settings,
    forward_queues: &[String],
    forward_exchanges: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let client_id = config
        .client
        .client_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let registry = BusRegistry::new(Arc::new(MemoryBroker::new()));
    info!("Relaying an in-process bus for '{}'", config.client.broker);
    let connector = registry.open(DEFAULT_CONNECTOR, &config.client.broker, None)?;

    let endpoint = RelayEndpoint::new(
        &config.client.url,
        &client_id,
        config.relay.chunk_limit,
        Duration::from_millis(config.relay.chunk_timeout_ms),
    )?;
    let client = RelayClient::new(
        &connector,
        &config.client.server_name,
        endpoint,
        Duration::from_millis(config.relay.retry_pause_ms),
    )?;

    let channel = connector.control_channel()?;
    for queue in forward_queues {
        control::request_queue_forward(channel.as_ref(), queue, true)?;
    }
    for exchange in forward_exchanges {
        control::request_exchange_forward(
            channel.as_ref(),
            exchange,
            ExchangeKind::Fanout,
            &[],
            true,
        )?;
    }
    info!(
        "Relay client '{}' connecting to {}",
        client_id, config.client.url
    );

    let stop = client.stop_handle();
    tokio::select! {
        _ = client.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            stop.stop();
        }
    }

    registry.close_all();
    Ok(())
}
