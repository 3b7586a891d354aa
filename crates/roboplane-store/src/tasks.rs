//! Per-node FIFO task queues.
//!
//! Tasks for node `id` live in the list `{prefix}:{id}` as JSON
//! `{"task_id", "payload", "created_at"}`. A dequeue removes the task: there
//! is no acknowledgement and no redelivery.

use std::sync::Arc;
use std::time::Duration;

use roboplane_types::{Clock, JsonMap, NodeTask, system_clock};
use tracing::debug;

use crate::backend::ListStore;
use crate::error::StoreError;

pub const DEFAULT_TASK_PREFIX: &str = "mesh:tasks";

/// Queue interface consumed by node agents.
pub trait NodeTaskQueue: Send + Sync {
    fn enqueue(&self, target: &str, payload: JsonMap) -> Result<NodeTask, StoreError>;

    /// Pop the next task for `target`.
    ///
    /// With `block == false` this returns immediately; otherwise it waits up
    /// to `timeout` (`None` waits forever). `Ok(None)` means nothing was
    /// available.
    fn dequeue(
        &self,
        target: &str,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<NodeTask>, StoreError>;
}

/// [`NodeTaskQueue`] over a shared [`ListStore`].
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn ListStore>,
    prefix: String,
    clock: Clock,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self::with_prefix(store, DEFAULT_TASK_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn ListStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn key(&self, target: &str) -> String {
        format!("{}:{}", self.prefix, target)
    }
}

impl NodeTaskQueue for TaskQueue {
    fn enqueue(&self, target: &str, payload: JsonMap) -> Result<NodeTask, StoreError> {
        let task = NodeTask::new(payload, (self.clock)());
        self.store.rpush(&self.key(target), &serde_json::to_string(&task)?)?;
        Ok(task)
    }

    fn dequeue(
        &self,
        target: &str,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<NodeTask>, StoreError> {
        let key = self.key(target);
        let raw = if block {
            self.store.blpop(&key, timeout)?
        } else {
            self.store.lpop(&key)?
        };
        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(task) => Some(task),
            Err(e) => {
                debug!(target_node = %target, error = %e, "discarding undecodable task");
                None
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::sqlite::SqliteStore;
    use serde_json::json;

    fn payload(name: &str) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("name".into(), json!(name));
        map
    }

    #[test]
    fn tasks_are_fifo() {
        let queue = TaskQueue::new(Arc::new(MemoryStore::new()));
        for name in ["A", "B", "C"] {
            queue.enqueue("n1", payload(name)).unwrap();
        }
        let names: Vec<_> = (0..3)
            .map(|_| queue.dequeue("n1", false, None).unwrap().unwrap().payload["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("A"), json!("B"), json!("C")]);
        assert!(queue.dequeue("n1", false, None).unwrap().is_none());
    }

    #[test]
    fn queues_are_isolated_per_node() {
        let queue = TaskQueue::new(Arc::new(MemoryStore::new()));
        queue.enqueue("n1", payload("for-n1")).unwrap();
        assert!(queue.dequeue("n2", false, None).unwrap().is_none());
        assert!(queue.dequeue("n1", false, None).unwrap().is_some());
    }

    #[test]
    fn dequeue_returns_the_enqueued_task() {
        let queue = TaskQueue::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
        let task = queue.enqueue("n1", payload("A")).unwrap();
        let got = queue.dequeue("n1", true, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(got, Some(task));
    }

    #[test]
    fn blocking_dequeue_times_out() {
        let queue = TaskQueue::new(Arc::new(MemoryStore::new()));
        let got = queue.dequeue("n1", true, Some(Duration::from_millis(20))).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn undecodable_entries_yield_none() {
        let store = Arc::new(MemoryStore::new());
        let queue = TaskQueue::new(store.clone());
        store.rpush("mesh:tasks:n1", "not json").unwrap();
        assert!(queue.dequeue("n1", false, None).unwrap().is_none());
    }
}
