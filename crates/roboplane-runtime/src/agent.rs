//! [`NodeAgent`] – a node's own presence in the mesh.
//!
//! Lifecycle: **stopped → running → stopped**.
//!
//! [`start`](NodeAgent::start) registers the node and spawns up to two
//! background threads:
//!
//! | Loop | Cadence | Work |
//! |---|---|---|
//! | heartbeat | every `heartbeat_interval`, scheduled from `next_due` | [`HeartbeatStore::beat`] with the current clock reading |
//! | task | `task_poll_interval` when the queue is empty | pops the next [`NodeTask`] and runs the handler |
//!
//! The task loop only runs when a handler is supplied. A failing or
//! panicking handler never stops the loop; the failure is logged and kept
//! in [`handler_failures`](NodeAgent::handler_failures).
//!
//! Cancellation is cooperative: [`stop`](NodeAgent::stop) clears the running
//! flag and joins both threads, so shutdown takes at most one loop sleep.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roboplane_kernel::{NodeHealth, classify};
use roboplane_store::{HeartbeatStore, MembershipStore, MembershipUpdate, NodeTaskQueue};
use roboplane_types::{Clock, JsonMap, MeshError, NodeInfo, NodeSnapshot, NodeTask, system_clock};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Upper bound on one heartbeat-loop sleep.
const HEARTBEAT_TICK: Duration = Duration::from_millis(250);

/// Floor for both loop intervals.
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(5);

/// Processes one task addressed to this node.
pub type TaskHandler = Arc<dyn Fn(&NodeTask) -> Result<(), MeshError> + Send + Sync>;

/// A task whose handler returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerFailure {
    pub task_id: String,
    pub error: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeAgentConfig {
    pub heartbeat_interval: Duration,
    /// Heartbeat age up to which [`NodeAgent::health`] reports healthy.
    pub heartbeat_grace: Duration,
    pub task_poll_interval: Duration,
}

impl Default for NodeAgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(15),
            task_poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Default)]
struct Loops {
    heartbeat: Option<JoinHandle<()>>,
    tasks: Option<JoinHandle<()>>,
}

pub struct NodeAgent {
    robo_id: String,
    registry: MembershipStore,
    heartbeats: HeartbeatStore,
    tasks: Arc<dyn NodeTaskQueue>,
    config: NodeAgentConfig,
    clock: Clock,
    /// Local mirror of what this node advertises. Empty address until started.
    local: Mutex<NodeInfo>,
    running: Arc<AtomicBool>,
    loops: Mutex<Loops>,
    failures: Arc<Mutex<Vec<HandlerFailure>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NodeAgent {
    pub fn new(
        robo_id: impl Into<String>,
        registry: MembershipStore,
        heartbeats: HeartbeatStore,
        tasks: Arc<dyn NodeTaskQueue>,
    ) -> Self {
        Self {
            robo_id: robo_id.into(),
            registry,
            heartbeats,
            tasks,
            config: NodeAgentConfig::default(),
            clock: system_clock(),
            local: Mutex::new(NodeInfo::default()),
            running: Arc::new(AtomicBool::new(false)),
            loops: Mutex::new(Loops::default()),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Intervals below [`MIN_LOOP_INTERVAL`] are raised to it.
    pub fn with_config(mut self, config: NodeAgentConfig) -> Self {
        self.config = NodeAgentConfig {
            heartbeat_interval: config.heartbeat_interval.max(MIN_LOOP_INTERVAL),
            task_poll_interval: config.task_poll_interval.max(MIN_LOOP_INTERVAL),
            ..config
        };
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn robo_id(&self) -> &str {
        &self.robo_id
    }

    pub fn config(&self) -> &NodeAgentConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// What this node currently advertises.
    pub fn info(&self) -> NodeInfo {
        lock(&self.local).clone()
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    /// Register the node and start its loops. A no-op while already running.
    ///
    /// # Errors
    ///
    /// Store failures from the initial registration. The agent stays stopped.
    pub fn start(&self, info: NodeInfo, handler: Option<TaskHandler>) -> Result<(), MeshError> {
        let mut loops = lock(&self.loops);
        if self.is_running() {
            debug!(robo_id = %self.robo_id, "agent already running");
            return Ok(());
        }

        self.registry.join(&self.robo_id, &info)?;
        *lock(&self.local) = info;
        self.running.store(true, Ordering::SeqCst);

        loops.heartbeat = Some(self.spawn_heartbeat_loop());
        if let Some(handler) = handler {
            loops.tasks = Some(self.spawn_task_loop(handler));
        }
        info!(robo_id = %self.robo_id, tasks = loops.tasks.is_some(), "node agent started");
        Ok(())
    }

    /// Stop both loops and drop the heartbeat entry. With `deregister` the
    /// membership entry is removed too.
    pub fn stop(&self, deregister: bool) -> Result<(), MeshError> {
        self.halt();
        self.heartbeats.remove(&self.robo_id)?;
        if deregister {
            self.registry.leave(&self.robo_id)?;
        }
        lock(&self.local).address.clear();
        info!(robo_id = %self.robo_id, deregister, "node agent stopped");
        Ok(())
    }

    /// Clear the running flag and join the loop threads.
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut loops = lock(&self.loops);
        for handle in [loops.heartbeat.take(), loops.tasks.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!(robo_id = %self.robo_id, "agent loop thread panicked");
            }
        }
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let id = self.robo_id.clone();
        let heartbeats = self.heartbeats.clone();
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);
        let interval = self.config.heartbeat_interval;
        let tick = interval.min(HEARTBEAT_TICK);

        thread::spawn(move || {
            let mut next_due = clock();
            while running.load(Ordering::SeqCst) {
                let now = clock();
                if now >= next_due {
                    if let Err(e) = heartbeats.beat(&id, Some(now)) {
                        warn!(robo_id = %id, error = %e, "heartbeat write failed");
                    }
                    next_due = now + interval.as_secs_f64();
                }
                thread::sleep(tick);
            }
        })
    }

    fn spawn_task_loop(&self, handler: TaskHandler) -> JoinHandle<()> {
        let id = self.robo_id.clone();
        let tasks = Arc::clone(&self.tasks);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);
        let failures = Arc::clone(&self.failures);
        let poll = self.config.task_poll_interval;

        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let task = match tasks.dequeue(&id, false, None) {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        thread::sleep(poll);
                        continue;
                    }
                    Err(e) => {
                        warn!(robo_id = %id, error = %e, "task dequeue failed");
                        thread::sleep(poll);
                        continue;
                    }
                };

                let error = match catch_unwind(AssertUnwindSafe(|| handler(&task))) {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "task handler panicked".to_string(),
                };
                warn!(robo_id = %id, task_id = %task.task_id, error = %error, "task handler failed");
                lock(&failures).push(HandlerFailure {
                    task_id: task.task_id.to_string(),
                    error,
                    timestamp: clock(),
                });
            }
        })
    }

    // ── registration updates ───────────────────────────────────────────────

    fn push_update(&self, update: MembershipUpdate) -> Result<(), MeshError> {
        if !self.registry.update(&self.robo_id, &update)? {
            debug!(robo_id = %self.robo_id, "update for unregistered node ignored");
        }
        Ok(())
    }

    /// Replace the advertised capabilities.
    pub fn update_capabilities<I, S>(&self, capabilities: I) -> Result<(), MeshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current: Vec<String> = {
            let mut local = lock(&self.local);
            local.capabilities = capabilities.into_iter().map(Into::into).collect();
            local.capabilities.iter().cloned().collect()
        };
        self.push_update(MembershipUpdate::new().capabilities(current))
    }

    pub fn register_driver<I, S>(&self, drivers: I) -> Result<(), MeshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current: Vec<String> = {
            let mut local = lock(&self.local);
            local.drivers.extend(drivers.into_iter().map(Into::into));
            local.drivers.iter().cloned().collect()
        };
        self.push_update(MembershipUpdate::new().drivers(current))
    }

    pub fn register_app<I, S>(&self, apps: I) -> Result<(), MeshError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current: Vec<String> = {
            let mut local = lock(&self.local);
            local.apps.extend(apps.into_iter().map(Into::into));
            local.apps.iter().cloned().collect()
        };
        self.push_update(MembershipUpdate::new().apps(current))
    }

    /// Merge `metadata` into the advertised metadata.
    pub fn update_metadata(&self, metadata: JsonMap) -> Result<(), MeshError> {
        let current = {
            let mut local = lock(&self.local);
            local.metadata.extend(metadata);
            local.metadata.clone()
        };
        self.push_update(MembershipUpdate::new().meta(current))
    }

    // ── work & inspection ──────────────────────────────────────────────────

    /// Queue `payload` for `target`.
    pub fn submit_task(&self, target: &str, payload: JsonMap) -> Result<NodeTask, MeshError> {
        Ok(self.tasks.enqueue(target, payload)?)
    }

    /// Failures recorded by the task loop, oldest first.
    pub fn handler_failures(&self) -> Vec<HandlerFailure> {
        lock(&self.failures).clone()
    }

    /// The gossip payload advertising this node.
    pub fn snapshot(&self) -> Result<NodeSnapshot, MeshError> {
        let heartbeat = self.heartbeats.last_seen(&self.robo_id)?;
        let local = lock(&self.local);
        Ok(NodeSnapshot {
            robo_id: self.robo_id.clone(),
            address: local.address.clone(),
            capabilities: local.capabilities.iter().cloned().collect(),
            drivers: local.drivers.iter().cloned().collect(),
            apps: local.apps.iter().cloned().collect(),
            meta: local.metadata.clone(),
            heartbeat,
        })
    }

    /// Seconds since the last heartbeat, or `None` if there has been none.
    pub fn last_heartbeat_age(&self) -> Result<Option<f64>, MeshError> {
        let last = self.heartbeats.last_seen(&self.robo_id)?;
        Ok(last.map(|ts| ((self.clock)() - ts).max(0.0)))
    }

    pub fn health(&self) -> Result<NodeHealth, MeshError> {
        let last = self.heartbeats.last_seen(&self.robo_id)?;
        Ok(classify(
            last,
            (self.clock)(),
            self.config.heartbeat_grace.as_secs_f64(),
        ))
    }
}

impl Drop for NodeAgent {
    fn drop(&mut self) {
        self.halt();
    }
}
