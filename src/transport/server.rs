use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{DEFAULT_CHUNK_LIMIT, DEFAULT_CHUNK_TIMEOUT_MS, RELAY_CONTENT_TYPE, frame_stream};
use crate::codec::{EncodedMessage, FrameDecoder};
use crate::connector::BusConnector;
use crate::handler::{MessageHandler, MessageHandlerChain, StreamOutputHandler, standard_chain};
use crate::security::SecurityFilterManager;

/// Shared state of the relay endpoint.
#[derive(Clone)]
pub struct RelayServerState {
    pub connector: Arc<BusConnector>,
    pub security: SecurityFilterManager,
    pub default_chunk_limit: usize,
    pub default_chunk_timeout: Duration,
}

impl RelayServerState {
    pub fn new(connector: Arc<BusConnector>) -> Self {
        Self {
            connector,
            security: SecurityFilterManager::new(),
            default_chunk_limit: DEFAULT_CHUNK_LIMIT,
            default_chunk_timeout: Duration::from_millis(DEFAULT_CHUNK_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub client_id: Option<String>,
    pub chunk_limit: Option<usize>,
    pub chunk_timeout: Option<u64>,
}

impl RelayQuery {
    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref().filter(|id| !id.is_empty())
    }
}

pub fn relay_router(path: &str, state: RelayServerState) -> Router {
    Router::new()
        .route(path, get(relay_get).post(relay_post))
        .with_state(state)
}

/// Binds `addr` and serves the relay endpoint until the task is dropped.
pub async fn start_relay_server(
    addr: &str,
    path: &str,
    state: RelayServerState,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Relay endpoint listening on http://{}{}", addr, path);
    axum::serve(listener, relay_router(path, state)).await
}

fn missing_client_id() -> Response {
    (StatusCode::BAD_REQUEST, "missing client_id").into_response()
}

/// Streams one retrieval chunk for the client.
async fn relay_get(State(state): State<RelayServerState>, Query(query): Query<RelayQuery>) -> Response {
    let Some(client_id) = query.client_id().map(str::to_string) else {
        return missing_client_id();
    };
    let retriever = match state.connector.retriever(&client_id) {
        Ok(retriever) => retriever,
        Err(e) => {
            error!("Unable to open retriever for client '{}': {}", client_id, e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    let limit = query.chunk_limit.unwrap_or(state.default_chunk_limit);
    let timeout = query
        .chunk_timeout
        .map(Duration::from_millis)
        .unwrap_or(state.default_chunk_timeout);

    let (tx, rx) = mpsc::unbounded_channel();
    let chain: Arc<dyn MessageHandler> = Arc::new(
        MessageHandlerChain::new()
            .add(Arc::new(state.security.request_handler(&client_id)))
            .add(Arc::new(StreamOutputHandler::new(tx))),
    );
    // Retrieval waits until the response body is first polled
    let (started_tx, started_rx) = oneshot::channel();
    tokio::spawn(async move {
        if started_rx.await.is_err() {
            debug!("Client '{}' went away before its chunk started", client_id);
            return;
        }
        let result = tokio::task::spawn_blocking(move || retriever.retrieve(chain, limit, timeout)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Retrieval for client '{}' failed: {}", client_id, e),
            Err(e) => error!("Retrieval task for client '{}' failed: {}", client_id, e),
        }
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, RELAY_CONTENT_TYPE)],
        Body::from_stream(frame_stream(rx, started_tx)),
    )
        .into_response()
}

async fn handle_batch(chain: Arc<dyn MessageHandler>, batch: Vec<EncodedMessage>) {
    if batch.is_empty() {
        return;
    }
    let result = tokio::task::spawn_blocking(move || {
        for message in &batch {
            chain.handle(message);
        }
    })
    .await;
    if let Err(e) = result {
        error!("Inbound handler task failed: {}", e);
    }
}

/// Feeds every record of the request body into the inbound chain.
async fn relay_post(
    State(state): State<RelayServerState>,
    Query(query): Query<RelayQuery>,
    body: Body,
) -> Response {
    let Some(client_id) = query.client_id().map(str::to_string) else {
        return missing_client_id();
    };
    let retriever = match state.connector.retriever(&client_id) {
        Ok(retriever) => retriever,
        Err(e) => {
            error!("Unable to open retriever for client '{}': {}", client_id, e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    let chain: Arc<dyn MessageHandler> = Arc::new(
        MessageHandlerChain::new()
            .add(Arc::new(state.security.filter(&client_id)))
            .add(Arc::new(standard_chain(retriever, &state.connector))),
    );

    let mut stream = body.into_data_stream();
    let mut decoder = FrameDecoder::new();
    let mut received = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Relay body from client '{}' failed: {}", client_id, e);
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
        };
        decoder.extend(&chunk);
        let mut batch = Vec::new();
        let fault = loop {
            match decoder.next_frame() {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };
        received += batch.len();
        handle_batch(chain.clone(), batch).await;
        if let Some(e) = fault {
            warn!("Malformed relay record from client '{}': {}", client_id, e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }
    if let Err(e) = decoder.finish() {
        warn!("Truncated relay body from client '{}': {}", client_id, e);
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    debug!("Received {} message(s) from client '{}'", received, client_id);
    (StatusCode::OK, received.to_string()).into_response()
}
