//! Push-stream fallback for discovery.
//!
//! [`WebSocketDiscoveryClient`] opens a [`MessageStream`] through a
//! [`StreamConnector`] and forwards every item to a callback from a
//! background thread. Two connectors are provided:
//!
//! * [`websocket_connector`] – reads text and binary frames from a
//!   WebSocket server (tokio-tungstenite on a private current-thread
//!   runtime).
//! * [`channel_stream`] – an in-process channel, handy for tests and for
//!   bridging other push sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use roboplane_store::{MessageStream, StreamPoll};
use roboplane_types::MeshError;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// How long one poll waits before re-checking the running flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Granularity of [`ChannelStream`] polling.
const POLL_STEP: Duration = Duration::from_millis(5);

/// Opens a fresh push stream.
pub type StreamConnector = Arc<dyn Fn() -> Result<Box<dyn MessageStream>, MeshError> + Send + Sync>;

// ────────────────────────────────────────────────────────────────────────────
// WebSocketDiscoveryClient
// ────────────────────────────────────────────────────────────────────────────

pub struct WebSocketDiscoveryClient {
    connect: StreamConnector,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WebSocketDiscoveryClient {
    pub fn new(connect: StreamConnector) -> Self {
        Self {
            connect,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Start forwarding stream items to `on_message`. No-op if already
    /// started.
    pub fn start<F>(&mut self, on_message: F)
    where
        F: Fn(String) + Send + 'static,
    {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let connect = Arc::clone(&self.connect);
        self.thread = Some(thread::spawn(move || {
            let mut stream = match connect() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "push stream connection failed");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            while running.load(Ordering::SeqCst) {
                match stream.poll_message(POLL_TIMEOUT) {
                    StreamPoll::Message(message) => on_message(message),
                    StreamPoll::Idle => {}
                    StreamPoll::Closed => {
                        debug!("push stream closed");
                        break;
                    }
                }
            }
            stream.close();
            running.store(false, Ordering::SeqCst);
        }));
    }

    /// `true` while the stream is open and being read.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop reading and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("push stream thread panicked");
        }
    }
}

impl Drop for WebSocketDiscoveryClient {
    fn drop(&mut self) {
        self.stop();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ChannelStream
// ────────────────────────────────────────────────────────────────────────────

/// A [`MessageStream`] fed by an unbounded channel. The stream closes once
/// every sender is dropped and the buffer is drained.
pub struct ChannelStream {
    receiver: Option<mpsc::UnboundedReceiver<String>>,
}

/// Create a connected sender / stream pair.
pub fn channel_stream() -> (mpsc::UnboundedSender<String>, ChannelStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelStream { receiver: Some(rx) })
}

impl MessageStream for ChannelStream {
    fn poll_message(&mut self, timeout: Duration) -> StreamPoll {
        let Some(receiver) = self.receiver.as_mut() else {
            return StreamPoll::Closed;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match receiver.try_recv() {
                Ok(message) => return StreamPoll::Message(message),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.receiver = None;
                    return StreamPoll::Closed;
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return StreamPoll::Idle;
                    }
                    thread::sleep(POLL_STEP.min(deadline - now));
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.close();
        }
        self.receiver = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// WebSocket connector
// ────────────────────────────────────────────────────────────────────────────

/// A [`StreamConnector`] that reads gossip frames from the WebSocket server
/// at `url`.
///
/// Each connection runs on its own thread with a current-thread tokio
/// runtime. Connecting is synchronous: the connector returns
/// [`MeshError::Transport`] if the handshake fails. The socket is closed
/// when the returned stream is closed or dropped.
pub fn websocket_connector(url: impl Into<String>) -> StreamConnector {
    let url = url.into();
    Arc::new(move || connect_websocket(&url))
}

fn connect_websocket(url: &str) -> Result<Box<dyn MessageStream>, MeshError> {
    let (tx, stream) = channel_stream();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
    let target = url.to_string();

    thread::Builder::new()
        .name("ws-discovery".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("runtime: {e}")));
                    return;
                }
            };
            runtime.block_on(pump_websocket(target, tx, ready_tx));
        })
        .map_err(|e| MeshError::transport(url, format!("spawn: {e}")))?;

    match ready_rx.blocking_recv() {
        Ok(Ok(())) => {
            info!(url = %url, "connected to discovery push stream");
            Ok(Box::new(stream))
        }
        Ok(Err(details)) => Err(MeshError::transport(url, details)),
        Err(_) => Err(MeshError::transport(url, "connection thread exited")),
    }
}

async fn pump_websocket(
    url: String,
    tx: mpsc::UnboundedSender<String>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if tx.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if tx.send(String::from_utf8_lossy(&bytes).into_owned()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "push stream read error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }
    let _ = ws.close(None).await;
}
