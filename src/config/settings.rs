use serde::Deserialize;

/// Top-level configuration settings for the relay.
///
/// Covers the HTTP endpoint, the local bus connection, chunking of the relay
/// loops and the client side of a relay link.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub bus: BusSettings,
    pub relay: RelaySettings,
    pub client: ClientSettings,
}

/// Address and path the relay endpoint binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// The broker connection registered on the server side.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusSettings {
    pub connector_name: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl BusSettings {
    /// The connection as a `[user@]host[:port]` host spec.
    pub fn host_spec(&self) -> String {
        let mut spec = String::new();
        if let Some(user) = &self.user {
            spec.push_str(user);
            spec.push('@');
        }
        spec.push_str(&self.host);
        if let Some(port) = self.port {
            spec.push(':');
            spec.push_str(&port.to_string());
        }
        spec
    }
}

/// Chunking and retry behaviour of the relay loops.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub chunk_limit: usize,
    pub chunk_timeout_ms: u64,
    pub retry_pause_ms: u64,
}

/// The client side of a relay link.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub url: String,
    pub server_name: String,
    pub client_id: Option<String>,
    pub broker: String,
}

/// Partial configuration loaded from files or environment.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub bus: Option<PartialBusSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBusSettings {
    pub connector_name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub chunk_limit: Option<usize>,
    pub chunk_timeout_ms: Option<u64>,
    pub retry_pause_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub server_name: Option<String>,
    pub client_id: Option<String>,
    pub broker: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                path: "/relay".to_string(),
            },
            bus: BusSettings {
                connector_name: "RELAY_SERVLET_DEFAULT".to_string(),
                host: "localhost".to_string(),
                port: None,
                user: None,
                password: None,
            },
            relay: RelaySettings {
                chunk_limit: 100,
                chunk_timeout_ms: 5000,
                retry_pause_ms: 500,
            },
            client: ClientSettings {
                url: "http://127.0.0.1:8080/relay".to_string(),
                server_name: "remote".to_string(),
                client_id: None,
                broker: "localhost".to_string(),
            },
        }
    }
}
