//! WebSocket JSON-RPC transport with request multiplexing and auto-reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainwire_core::{
    route_frame, Endpoint, HealthStatus, OutgoingRequest, PendingRegistry, RpcError, RpcTransport,
    SubscriptionManager, TransportKind,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// WebSocket JSON-RPC transport.
///
/// A background task owns the connection: it is the only writer (frames
/// are queued through a channel, so sends never interleave) and it routes
/// every inbound frame by envelope id through the shared [`PendingRegistry`].
/// When the connection drops, every pending request fails with a WebSocket
/// transport error and the task reconnects with exponential backoff.
pub struct WsTransport {
    url: String,
    frames: mpsc::UnboundedSender<String>,
    pending: PendingRegistry,
    subscriptions: SubscriptionManager,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Connect to a `ws`/`wss` endpoint and start the connection task.
    pub async fn connect(url: &str, config: WsConfig) -> Result<Self, RpcError> {
        let endpoint = Endpoint::parse(url)?;
        endpoint.expect_kind(TransportKind::WebSocket)?;
        let url = endpoint.to_string();

        tracing::info!(url = %url, "connecting via WebSocket");
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RpcError::ws(format!("connect to {url} failed: {e}")))?;

        let (frames, frame_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending = PendingRegistry::new();
        let subscriptions = SubscriptionManager::new();
        let connected = Arc::new(AtomicBool::new(true));

        let task = ConnectionTask {
            url: url.clone(),
            config,
            frames: frame_rx,
            shutdown: shutdown_rx,
            pending: pending.clone(),
            subscriptions: subscriptions.clone(),
            connected: connected.clone(),
        };
        tokio::spawn(task.run(stream));

        Ok(Self {
            url,
            frames,
            pending,
            subscriptions,
            connected,
            shutdown,
        })
    }

    /// Connect with default configuration.
    pub async fn connect_default(url: &str) -> Result<Self, RpcError> {
        Self::connect(url, WsConfig::default()).await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn shut_down(&self) {
        self.pending.close();
        self.subscriptions.clear();
        self.shutdown.send_replace(true);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shut_down();
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError> {
        if !self.is_connected() && !self.pending.is_closed() {
            return Err(RpcError::ws("not connected, reconnect in progress"));
        }
        let handle = self.pending.register(req.id, &req.method)?;
        self.frames
            .send(req.body)
            .map_err(|_| RpcError::ws("connection task stopped"))?;
        handle.wait().await
    }

    async fn close(&self) {
        tracing::info!(url = %self.url, "closing WebSocket transport");
        self.shut_down();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn health(&self) -> HealthStatus {
        if self.pending.is_closed() {
            HealthStatus::Unhealthy
        } else if self.is_connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn subscriptions(&self) -> Option<&SubscriptionManager> {
        Some(&self.subscriptions)
    }
}

enum Exit {
    Shutdown,
    Dropped(String),
}

struct ConnectionTask {
    url: String,
    config: WsConfig,
    frames: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    pending: PendingRegistry,
    subscriptions: SubscriptionManager,
    connected: Arc<AtomicBool>,
}

impl ConnectionTask {
    async fn run(mut self, initial: WsStream) {
        let mut stream = Some(initial);
        let mut backoff = self.config.reconnect_initial;

        loop {
            let ws = match stream.take() {
                Some(ws) => ws,
                None => match self.reconnect(&mut backoff).await {
                    Some(ws) => {
                        // Frames queued while down are never replayed.
                        self.discard_queued("connection lost before send");
                        ws
                    }
                    None => return,
                },
            };
            self.connected.store(true, Ordering::Release);

            let (mut sink, mut source) = ws.split();
            let exit = self.pump(&mut sink, &mut source).await;
            self.connected.store(false, Ordering::Release);

            match exit {
                Exit::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    tracing::info!(url = %self.url, "WebSocket connection closed");
                    return;
                }
                Exit::Dropped(reason) => {
                    tracing::warn!(url = %self.url, %reason, "WebSocket disconnected");
                    self.discard_queued(&reason);
                    let dropped = self.subscriptions.clear();
                    if dropped > 0 {
                        tracing::warn!(url = %self.url, dropped, "subscriptions ended by disconnect");
                    }
                }
            }
        }
    }

    /// Drop unsent frames and fail every request still waiting.
    fn discard_queued(&mut self, reason: &str) {
        let mut discarded = 0usize;
        while self.frames.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(url = %self.url, discarded, "discarded unsent frames");
        }
        self.pending.fail_all(&RpcError::ws(reason));
    }

    /// Reconnect with exponential backoff. `None` means shut down.
    async fn reconnect(&mut self, backoff: &mut Duration) -> Option<WsStream> {
        loop {
            tracing::info!(url = %self.url, "reconnecting in {backoff:?}");
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return None,
                _ = time::sleep(*backoff) => {}
            }
            *backoff = (*backoff * 2).min(self.config.reconnect_max);

            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return None,
                conn = tokio_tungstenite::connect_async(self.url.as_str()) => match conn {
                    Ok((ws, _)) => {
                        *backoff = self.config.reconnect_initial;
                        tracing::info!(url = %self.url, "WebSocket reconnected");
                        return Some(ws);
                    }
                    Err(e) => tracing::warn!(url = %self.url, error = %e, "WS connect failed"),
                },
            }
        }
    }

    /// Shuttle frames in both directions until shutdown or disconnect.
    async fn pump(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
        source: &mut SplitStream<WsStream>,
    ) -> Exit {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return Exit::Shutdown,
                frame = self.frames.recv() => match frame {
                    None => return Exit::Shutdown,
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            return Exit::Dropped(format!("send failed: {e}"));
                        }
                    }
                },
                msg = source.next() => match msg {
                    None => return Exit::Dropped("stream closed".into()),
                    Some(Err(e)) => return Exit::Dropped(format!("receive failed: {e}")),
                    Some(Ok(Message::Text(text))) => {
                        route_frame(text.as_str(), &self.pending, &self.subscriptions);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            route_frame(text, &self.pending, &self.subscriptions);
                        }
                        Err(_) => tracing::debug!("ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) => return Exit::Dropped("closed by peer".into()),
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
