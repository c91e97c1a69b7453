//! IPC JSON-RPC transport over a Unix domain socket.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};

use chainwire_core::{
    route_frame, Endpoint, HealthStatus, OutgoingRequest, PendingRegistry, RpcError, RpcTransport,
    SubscriptionManager, TransportKind,
};

use crate::framing::FrameBuffer;

const READ_CHUNK: usize = 8 * 1024;

/// IPC JSON-RPC transport.
///
/// Same model as the WebSocket transport: one task owns the socket, writes
/// are queued, and replies are correlated by envelope id. There is no
/// reconnect: once the socket drops, pending requests fail with an IPC
/// transport error and later sends fail immediately.
pub struct IpcTransport {
    path: PathBuf,
    label: String,
    frames: mpsc::UnboundedSender<String>,
    pending: PendingRegistry,
    subscriptions: SubscriptionManager,
    alive: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl IpcTransport {
    /// Connect to a socket given as a path or `ipc://` URI.
    pub async fn connect(endpoint: &str) -> Result<Self, RpcError> {
        let endpoint = Endpoint::parse(endpoint)?;
        endpoint.expect_kind(TransportKind::Ipc)?;
        match endpoint.as_path() {
            Some(path) => Self::connect_path(path).await,
            None => Err(RpcError::invalid_endpoint(endpoint.to_string(), "missing socket path")),
        }
    }

    pub async fn connect_path(path: &Path) -> Result<Self, RpcError> {
        let label = path.display().to_string();
        tracing::info!(path = %label, "connecting via IPC");
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| RpcError::ipc(format!("connect to {label} failed: {e}")))?;
        let (reader, writer) = stream.into_split();

        let (frames, frame_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending = PendingRegistry::new();
        let subscriptions = SubscriptionManager::new();
        let alive = Arc::new(AtomicBool::new(true));

        let task = SocketTask {
            label: label.clone(),
            frames: frame_rx,
            shutdown: shutdown_rx,
            pending: pending.clone(),
            subscriptions: subscriptions.clone(),
            alive: alive.clone(),
        };
        tokio::spawn(task.run(reader, writer));

        Ok(Self {
            path: path.to_path_buf(),
            label,
            frames,
            pending,
            subscriptions,
            alive,
            shutdown,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn shut_down(&self) {
        self.pending.close();
        self.subscriptions.clear();
        self.shutdown.send_replace(true);
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.shut_down();
    }
}

#[async_trait]
impl RpcTransport for IpcTransport {
    async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError> {
        if !self.alive.load(Ordering::Acquire) && !self.pending.is_closed() {
            return Err(RpcError::ipc("connection lost"));
        }
        let handle = self.pending.register(req.id, &req.method)?;
        self.frames
            .send(req.body)
            .map_err(|_| RpcError::ipc("connection lost"))?;
        handle.wait().await
    }

    async fn close(&self) {
        tracing::info!(path = %self.label, "closing IPC transport");
        self.shut_down();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ipc
    }

    fn health(&self) -> HealthStatus {
        if self.alive.load(Ordering::Acquire) && !self.pending.is_closed() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn url(&self) -> &str {
        &self.label
    }

    fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn subscriptions(&self) -> Option<&SubscriptionManager> {
        Some(&self.subscriptions)
    }
}

struct SocketTask {
    label: String,
    frames: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    pending: PendingRegistry,
    subscriptions: SubscriptionManager,
    alive: Arc<AtomicBool>,
}

impl SocketTask {
    async fn run(mut self, mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) {
        let mut buffer = FrameBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        let failure = loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => break None,
                frame = self.frames.recv() => match frame {
                    None => break None,
                    Some(mut text) => {
                        text.push('\n');
                        if let Err(e) = writer.write_all(text.as_bytes()).await {
                            break Some(format!("write failed: {e}"));
                        }
                    }
                },
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => break Some("socket closed by peer".to_string()),
                    Ok(n) => {
                        buffer.extend(&chunk[..n]);
                        match buffer.drain_frames() {
                            Ok(frames) => {
                                for frame in frames {
                                    route_frame(&frame, &self.pending, &self.subscriptions);
                                }
                            }
                            Err(e) => break Some(format!("malformed data: {e}")),
                        }
                    }
                    Err(e) => break Some(format!("read failed: {e}")),
                },
            }
        };

        self.alive.store(false, Ordering::Release);
        self.frames.close();
        match failure {
            None => {
                let _ = writer.shutdown().await;
                tracing::info!(path = %self.label, "IPC connection closed");
            }
            Some(reason) => {
                tracing::warn!(path = %self.label, %reason, "IPC connection lost");
                self.pending.fail_all(&RpcError::ipc(reason));
                self.subscriptions.clear();
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
