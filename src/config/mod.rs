//! The `config` module loads relay settings.
//!
//! Sources, lowest priority first: built-in defaults, the optional
//! `config/default` file, then `RELAY__`-prefixed environment variables
//! (`RELAY__SERVER__PORT=9000`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BusSettings, ClientSettings, RelaySettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// and merges it over [`Settings::default`].
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let partial: PartialSettings = builder.build()?.try_deserialize()?;
    Ok(merge(partial))
}

fn merge(partial: PartialSettings) -> Settings {
    let default = Settings::default();
    let server = partial.server.as_ref();
    let bus = partial.bus.as_ref();
    let relay = partial.relay.as_ref();
    let client = partial.client.as_ref();

    Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
            path: server
                .and_then(|s| s.path.clone())
                .unwrap_or(default.server.path),
        },
        bus: BusSettings {
            connector_name: bus
                .and_then(|b| b.connector_name.clone())
                .unwrap_or(default.bus.connector_name),
            host: bus
                .and_then(|b| b.host.clone())
                .unwrap_or(default.bus.host),
            port: bus.and_then(|b| b.port).or(default.bus.port),
            user: bus.and_then(|b| b.user.clone()).or(default.bus.user),
            password: bus
                .and_then(|b| b.password.clone())
                .or(default.bus.password),
        },
        relay: RelaySettings {
            chunk_limit: relay
                .and_then(|r| r.chunk_limit)
                .unwrap_or(default.relay.chunk_limit),
            chunk_timeout_ms: relay
                .and_then(|r| r.chunk_timeout_ms)
                .unwrap_or(default.relay.chunk_timeout_ms),
            retry_pause_ms: relay
                .and_then(|r| r.retry_pause_ms)
                .unwrap_or(default.relay.retry_pause_ms),
        },
        client: ClientSettings {
            url: client
                .and_then(|c| c.url.clone())
                .unwrap_or(default.client.url),
            server_name: client
                .and_then(|c| c.server_name.clone())
                .unwrap_or(default.client.server_name),
            client_id: client
                .and_then(|c| c.client_id.clone())
                .or(default.client.client_id),
            broker: client
                .and_then(|c| c.broker.clone())
                .unwrap_or(default.client.broker),
        },
    }
}

#[cfg(test)]
mod tests;
