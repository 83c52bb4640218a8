use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    DEFAULT_CHUNK_LIMIT, DEFAULT_CHUNK_TIMEOUT_MS, DEFAULT_RELAY_PATH, DEFAULT_RETRY_PAUSE_MS,
    RELAY_CONTENT_TYPE, frame_stream,
};
use crate::codec::{EncodedMessage, FrameDecoder};
use crate::connector::BusConnector;
use crate::handler::{MessageHandler, MessageHandlerChain, StreamOutputHandler, standard_chain};
use crate::retriever::MessageRetriever;
use crate::security::SecurityFilterManager;
use crate::utils::error::{RelayError, RelayResult};

/// Relay endpoint address plus the query every request carries.
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    url: Url,
    chunk_limit: usize,
    chunk_timeout: Duration,
}

impl RelayEndpoint {
    /// Builds the endpoint URL. An empty path is replaced with the default
    /// relay path.
    pub fn new(
        base: &str,
        client_id: &str,
        chunk_limit: usize,
        chunk_timeout: Duration,
    ) -> RelayResult<Self> {
        let mut url = Url::parse(base)?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(DEFAULT_RELAY_PATH);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("client_id", client_id)
            .append_pair("chunk_limit", &chunk_limit.to_string())
            .append_pair("chunk_timeout", &chunk_timeout.as_millis().to_string());
        Ok(Self {
            url,
            chunk_limit,
            chunk_timeout,
        })
    }

    pub fn with_defaults(base: &str, client_id: &str) -> RelayResult<Self> {
        Self::new(
            base,
            client_id,
            DEFAULT_CHUNK_LIMIT,
            Duration::from_millis(DEFAULT_CHUNK_TIMEOUT_MS),
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }
}

/// Shared stop flag for the relay loops, checked once per cycle.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs `chain` over decoded records on the blocking pool.
async fn handle_batch(chain: &Arc<dyn MessageHandler>, batch: Vec<EncodedMessage>) -> RelayResult<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let chain = chain.clone();
    tokio::task::spawn_blocking(move || {
        for message in &batch {
            chain.handle(message);
        }
    })
    .await
    .map_err(|e| RelayError::Task(e.to_string()))
}

/// Long-poll loop feeding inbound records into a handler.
pub struct MessageReceiverTask {
    http: reqwest::Client,
    endpoint: RelayEndpoint,
    handler: Arc<dyn MessageHandler>,
    stop: StopHandle,
    retry_pause: Duration,
}

impl MessageReceiverTask {
    pub fn new(
        http: reqwest::Client,
        endpoint: RelayEndpoint,
        handler: Arc<dyn MessageHandler>,
        stop: StopHandle,
    ) -> Self {
        Self {
            http,
            endpoint,
            handler,
            stop,
            retry_pause: Duration::from_millis(DEFAULT_RETRY_PAUSE_MS),
        }
    }

    pub fn with_retry_pause(mut self, retry_pause: Duration) -> Self {
        self.retry_pause = retry_pause;
        self
    }

    /// One `GET` cycle. Returns the number of records received.
    pub async fn cycle(&self) -> RelayResult<usize> {
        let response = self.http.get(self.endpoint.url().clone()).send().await?;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut received = 0usize;
        while let Some(chunk) = body.next().await {
            decoder.extend(&chunk?);
            let mut batch = Vec::new();
            while let Some(message) = decoder.next_frame()? {
                batch.push(message);
            }
            received += batch.len();
            handle_batch(&self.handler, batch).await?;
        }
        decoder.finish()?;
        Ok(received)
    }

    pub async fn run(&self) {
        info!("Receiver started for {}", self.endpoint.url());
        while !self.stop.is_stopped() {
            match self.cycle().await {
                Ok(received) => debug!("Receiver cycle delivered {} message(s)", received),
                Err(e) => {
                    warn!("Relay receive failed: {}", e);
                    tokio::time::sleep(self.retry_pause).await;
                }
            }
        }
        info!("Receiver stopped");
    }
}

/// Loop streaming one retrieval chunk per `POST`.
pub struct MessageTransmitterTask {
    http: reqwest::Client,
    endpoint: RelayEndpoint,
    retriever: Arc<dyn MessageRetriever>,
    observer: Option<Arc<dyn MessageHandler>>,
    stop: StopHandle,
    retry_pause: Duration,
}

impl MessageTransmitterTask {
    pub fn new(
        http: reqwest::Client,
        endpoint: RelayEndpoint,
        retriever: Arc<dyn MessageRetriever>,
        stop: StopHandle,
    ) -> Self {
        Self {
            http,
            endpoint,
            retriever,
            observer: None,
            stop,
            retry_pause: Duration::from_millis(DEFAULT_RETRY_PAUSE_MS),
        }
    }

    /// Handler run on every outgoing record before it is written.
    pub fn with_observer(mut self, observer: Arc<dyn MessageHandler>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_retry_pause(mut self, retry_pause: Duration) -> Self {
        self.retry_pause = retry_pause;
        self
    }

    /// One `POST` cycle carrying one retrieval chunk.
    ///
    /// The retriever is only called once the connection starts pulling the
    /// body. A request that never gets that far leaves the buffer and the
    /// broker untouched for the next cycle.
    pub async fn cycle(&self) -> RelayResult<()> {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let mut chain = MessageHandlerChain::new();
        if let Some(observer) = &self.observer {
            chain.push(observer.clone());
        }
        chain.push(Arc::new(StreamOutputHandler::new(tx)));

        let retriever = self.retriever.clone();
        let limit = self.endpoint.chunk_limit();
        let timeout = self.endpoint.chunk_timeout();
        let retrieval: JoinHandle<RelayResult<bool>> = tokio::spawn(async move {
            if started_rx.await.is_err() {
                return Ok::<bool, RelayError>(false);
            }
            tokio::task::spawn_blocking(move || retriever.retrieve(Arc::new(chain), limit, timeout))
                .await
                .map_err(|e| RelayError::Task(e.to_string()))??;
            Ok(true)
        });

        let response = self
            .http
            .post(self.endpoint.url().clone())
            .header(CONTENT_TYPE, RELAY_CONTENT_TYPE)
            .body(reqwest::Body::wrap_stream(frame_stream(rx, started_tx)))
            .send()
            .await;

        let delivered = matches!(&response, Ok(r) if r.status().is_success());
        if !delivered {
            // No need to wait out the chunk timeout on a failed request
            retrieval.abort();
        }
        match retrieval.await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => debug!("Relay POST failed before the body was read"),
            Ok(Err(e)) => return Err(e),
            Err(e) if e.is_cancelled() => {}
            Err(e) => return Err(RelayError::Task(e.to_string())),
        }
        let response = response?;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    pub async fn run(&self) {
        info!("Transmitter started for {}", self.endpoint.url());
        while !self.stop.is_stopped() {
            if let Err(e) = self.cycle().await {
                warn!("Relay transmit failed: {}", e);
                tokio::time::sleep(self.retry_pause).await;
            }
        }
        info!("Transmitter stopped");
    }
}

/// Both relay loops for one local connector and one relay server.
///
/// Outbound: the local retriever for `server_name`, observed by the
/// security request handler. Inbound: the security filter followed by the
/// standard chain on the same retriever.
pub struct RelayClient {
    receiver: Arc<MessageReceiverTask>,
    transmitter: Arc<MessageTransmitterTask>,
    security: SecurityFilterManager,
    stop: StopHandle,
}

impl RelayClient {
    pub fn new(
        connector: &BusConnector,
        server_name: &str,
        endpoint: RelayEndpoint,
        retry_pause: Duration,
    ) -> RelayResult<Self> {
        Self::with_http(
            connector,
            server_name,
            endpoint,
            retry_pause,
            reqwest::Client::new(),
        )
    }

    /// Same as [`RelayClient::new`] on a caller-built HTTP client.
    pub fn with_http(
        connector: &BusConnector,
        server_name: &str,
        endpoint: RelayEndpoint,
        retry_pause: Duration,
        http: reqwest::Client,
    ) -> RelayResult<Self> {
        let retriever = connector.retriever(server_name)?;
        let security = SecurityFilterManager::new();
        let stop = StopHandle::new();

        let inbound: Arc<dyn MessageHandler> = Arc::new(
            MessageHandlerChain::new()
                .add(Arc::new(security.filter(server_name)))
                .add(Arc::new(standard_chain(retriever.clone(), connector))),
        );
        let receiver = MessageReceiverTask::new(http.clone(), endpoint.clone(), inbound, stop.clone())
            .with_retry_pause(retry_pause);
        let transmitter = MessageTransmitterTask::new(http, endpoint, retriever, stop.clone())
            .with_observer(Arc::new(security.request_handler(server_name)))
            .with_retry_pause(retry_pause);

        Ok(Self {
            receiver: Arc::new(receiver),
            transmitter: Arc::new(transmitter),
            security,
            stop,
        })
    }

    /// Authorization state built from the requests this client sent.
    pub fn security(&self) -> &SecurityFilterManager {
        &self.security
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Spawns both loops on the runtime.
    pub fn spawn(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let receiver = self.receiver.clone();
        let transmitter = self.transmitter.clone();
        (
            tokio::spawn(async move { receiver.run().await }),
            tokio::spawn(async move { transmitter.run().await }),
        )
    }

    /// Runs both loops until stopped.
    pub async fn run(&self) {
        tokio::join!(self.receiver.run(), self.transmitter.run());
    }
}
