use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::bus::{BrokerClient, ConnectParams};
use crate::connector::BusConnector;
use crate::utils::error::{RelayError, RelayResult};

/// Parses `[user@]host[:port]`.
pub fn parse_host_spec(spec: &str, password: Option<&str>) -> RelayResult<ConnectParams> {
    let (username, rest) = match spec.split_once('@') {
        Some((user, rest)) => (Some(user.to_string()), rest),
        None => (None, spec),
    };
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| RelayError::InvalidHostSpec(spec.to_string()))?;
            (host, Some(port))
        }
        None => (rest, None),
    };
    if host.is_empty() {
        return Err(RelayError::InvalidHostSpec(spec.to_string()));
    }
    Ok(ConnectParams {
        host: host.to_string(),
        port,
        username,
        password: password.map(str::to_string),
    })
}

/// Named broker connections, owned by the process entry point.
pub struct BusRegistry {
    broker: Arc<dyn BrokerClient>,
    connectors: Mutex<HashMap<String, Arc<BusConnector>>>,
}

impl BusRegistry {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            connectors: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<BusConnector>>> {
        self.connectors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates the connector `name`, shutting down any previous connector
    /// registered under the same name.
    pub fn open(
        &self,
        name: &str,
        host_spec: &str,
        password: Option<&str>,
    ) -> RelayResult<Arc<BusConnector>> {
        let params = parse_host_spec(host_spec, password)?;
        let connector = Arc::new(BusConnector::new(name, self.broker.clone(), params));
        connector.connection()?;
        let previous = self.lock().insert(name.to_string(), connector.clone());
        if let Some(previous) = previous {
            info!("Replacing connector '{}'", name);
            previous.shutdown();
        }
        Ok(connector)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BusConnector>> {
        self.lock().get(name).cloned()
    }

    /// Looks up a connector, failing when it is not registered.
    pub fn require(&self, name: &str) -> RelayResult<Arc<BusConnector>> {
        self.get(name)
            .ok_or_else(|| RelayError::UnknownConnector(name.to_string()))
    }

    /// Shuts down and unregisters `name`. Returns whether it existed.
    pub fn close(&self, name: &str) -> bool {
        let removed = self.lock().remove(name);
        match removed {
            Some(connector) => {
                connector.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let connectors: Vec<Arc<BusConnector>> = self.lock().drain().map(|(_, c)| c).collect();
        for connector in connectors {
            connector.shutdown();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
