//! The transport boundary.
//!
//! [`NetworkInterface`] is the minimal surface the dispatcher and the
//! control plane need from a transport. Listening is not part of the trait:
//! any transport can be drained in the background by a [`NetworkListener`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roboplane_types::MeshError;
use serde_json::Value;
use tracing::{debug, warn};

/// A message transport between nodes.
pub trait NetworkInterface: Send + Sync {
    /// Deliver `message` to `recipient`.
    ///
    /// # Errors
    ///
    /// [`MeshError::Transport`] when the message could not be handed off.
    fn send(&self, recipient: &str, message: &Value) -> Result<(), MeshError>;

    /// Deliver `message` to every node.
    fn broadcast(&self, message: &Value) -> Result<(), MeshError>;

    /// Next inbound `(recipient, message)`, if any. Never blocks.
    fn receive(&self) -> Option<(String, Value)>;
}

/// Invoked with `(recipient, message)` for every received message.
pub type MessageCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Background thread that polls [`NetworkInterface::receive`] and hands
/// each message to a callback, sleeping `idle_sleep` whenever nothing is
/// waiting.
///
/// A panicking callback is logged and the loop keeps going.
pub struct NetworkListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkListener {
    pub fn spawn(
        network: Arc<dyn NetworkInterface>,
        callback: MessageCallback,
        idle_sleep: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            debug!("network listener started");
            while flag.load(Ordering::SeqCst) {
                match network.receive() {
                    Some((recipient, message)) => {
                        let delivered =
                            catch_unwind(AssertUnwindSafe(|| callback(&recipient, &message)));
                        if delivered.is_err() {
                            warn!(recipient = %recipient, "message callback panicked");
                        }
                    }
                    None => thread::sleep(idle_sleep),
                }
            }
            debug!("network listener stopped");
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("network listener thread panicked");
        }
    }
}

impl Drop for NetworkListener {
    fn drop(&mut self) {
        self.stop();
    }
}
