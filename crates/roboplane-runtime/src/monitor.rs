//! [`DispatchMonitor`] – append-only dispatch telemetry.
//!
//! The dispatcher records one [`DispatchEvent`] per terminal decision plus
//! one per failed delivery to an individual candidate. Recording never
//! fails; the log is unbounded and queried through
//! [`recent`](DispatchMonitor::recent) and
//! [`failures`](DispatchMonitor::failures).

use std::sync::{Mutex, MutexGuard, PoisonError};

use roboplane_types::DispatchEvent;
use tracing::debug;

#[derive(Default)]
pub struct DispatchMonitor {
    events: Mutex<Vec<DispatchEvent>>,
}

impl DispatchMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> MutexGuard<'_, Vec<DispatchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event` and hand back a copy of what was stored.
    pub fn record(&self, event: DispatchEvent) -> DispatchEvent {
        debug!(
            pack_id = %event.pack_id,
            status = %event.status,
            node = ?event.target,
            attempts = event.attempts.len(),
            "dispatch event recorded"
        );
        self.events().push(event.clone());
        event
    }

    /// The `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<DispatchEvent> {
        let events = self.events();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    /// Every event whose status is not `dispatched`.
    pub fn failures(&self) -> Vec<DispatchEvent> {
        self.events().iter().filter(|e| e.is_failure()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
