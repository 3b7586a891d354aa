//! [`MeshDispatcher`] – capability-aware dispatch with retry and failover.
//!
//! # Algorithm
//!
//! 1. Requirements come from the explicit argument, else from
//!    `pack["requirements"]`, else are empty.
//! 2. Candidates are the exact matches (capabilities, drivers and apps)
//!    followed by the fallback matches (capabilities and apps only), each
//!    node listed once at its first position. No candidates ends the call
//!    with [`DispatchStatus::NoCandidates`].
//! 3. Each candidate in turn has its drivers resolved. An unsatisfied
//!    candidate is remembered if it is missing fewer drivers than any seen
//!    before. A satisfied candidate is sent the message up to
//!    `retry_attempts` times with linear backoff; the first successful send
//!    ends the call with [`DispatchStatus::Dispatched`].
//! 4. Otherwise the call ends with [`DispatchStatus::DriversMissing`] for the
//!    best unsatisfied candidate, or [`DispatchStatus::DeliveryFailed`].
//!
//! Dispatch never returns an error. Every terminal branch records exactly
//! one event in the [`DispatchMonitor`]; each candidate whose delivery
//! failed records one more.
//!
//! The retry backoff sleeps the calling thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use roboplane_kernel::{CapabilityDirectory, DriverResolution, DriverResolver};
use roboplane_middleware::NetworkInterface;
use roboplane_types::{
    CapabilityRecord, Clock, DispatchEvent, DispatchOutcome, DispatchStatus, JsonMap, Requirements,
    pack_identifier, system_clock,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::monitor::DispatchMonitor;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Result of sending to one candidate with retries.
struct Delivery {
    attempts: u32,
    error: Option<String>,
}

/// The candidate with the fewest missing drivers seen so far.
struct BestFailure {
    candidate: CapabilityRecord,
    resolution: DriverResolution,
    attempts: Vec<String>,
}

pub struct MeshDispatcher {
    directory: Arc<CapabilityDirectory>,
    network: Arc<dyn NetworkInterface>,
    resolver: DriverResolver,
    monitor: Arc<DispatchMonitor>,
    retry_attempts: u32,
    retry_backoff: Duration,
    clock: Clock,
}

impl MeshDispatcher {
    pub fn new(directory: Arc<CapabilityDirectory>, network: Arc<dyn NetworkInterface>) -> Self {
        Self {
            resolver: DriverResolver::new(Arc::clone(&directory)),
            directory,
            network,
            monitor: Arc::new(DispatchMonitor::new()),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            clock: system_clock(),
        }
    }

    /// Replace the default resolver (no installer, no request handler).
    pub fn with_resolver(mut self, resolver: DriverResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<DispatchMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Send attempts per candidate (at least one) and the base backoff.
    /// Attempt `n` is followed by a sleep of `backoff * n`.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Clock used to timestamp telemetry events.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn directory(&self) -> &Arc<CapabilityDirectory> {
        &self.directory
    }

    pub fn resolver(&self) -> &DriverResolver {
        &self.resolver
    }

    pub fn monitor(&self) -> &Arc<DispatchMonitor> {
        &self.monitor
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Exact matches first, then fallback matches, deduplicated by id.
    fn candidates(&self, requirements: &Requirements) -> Vec<CapabilityRecord> {
        let exact = self.directory.find(requirements);
        let fallback = self.directory.find(&requirements.without_drivers());
        let mut seen = IndexSet::new();
        exact
            .into_iter()
            .chain(fallback)
            .filter(|record| seen.insert(record.robo_id.clone()))
            .collect()
    }

    fn send_with_retry(&self, address: &str, message: &Value) -> Delivery {
        let mut last_error = None;
        for attempt in 1..=self.retry_attempts {
            match self.network.send(address, message) {
                Ok(()) => {
                    return Delivery {
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(address = %address, attempt, error = %e, "dispatch send attempt failed");
                    last_error = Some(e.to_string());
                    if attempt < self.retry_attempts && !self.retry_backoff.is_zero() {
                        thread::sleep(self.retry_backoff * attempt);
                    }
                }
            }
        }
        Delivery {
            attempts: self.retry_attempts,
            error: Some(last_error.unwrap_or_else(|| "network send failed".to_string())),
        }
    }

    fn event(&self, pack_id: &str, status: DispatchStatus) -> DispatchEvent {
        DispatchEvent::new(pack_id, status, (self.clock)())
    }

    /// Dispatch `pack` to a capable node.
    ///
    /// The delivered message is
    /// `{"pack": …, "origin": …, "target": <node id>, "requirements": …}`,
    /// sent to the node's registered address.
    pub fn dispatch(
        &self,
        pack: &Value,
        origin: Option<&str>,
        requirements: Option<&Requirements>,
    ) -> DispatchOutcome {
        let requirements = requirements
            .cloned()
            .or_else(|| pack.get("requirements").map(Requirements::from_value))
            .unwrap_or_default();
        let pack_id = pack_identifier(pack);
        let candidates = self.candidates(&requirements);

        if candidates.is_empty() {
            let mut outcome = DispatchOutcome::new(DispatchStatus::NoCandidates);
            outcome.reason = Some("No nodes match requested capabilities".to_string());
            self.monitor.record(
                self.event(&pack_id, outcome.status)
                    .with_error("No nodes match requested capabilities"),
            );
            info!(pack_id = %pack_id, "no candidates for dispatch");
            return outcome;
        }

        let started = Instant::now();
        let mut attempted: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut best_failure: Option<BestFailure> = None;

        for candidate in candidates {
            attempted.push(candidate.robo_id.clone());
            let resolution = self
                .resolver
                .resolve(&candidate.robo_id, &requirements.drivers, true);

            if !resolution.satisfied {
                debug!(
                    pack_id = %pack_id,
                    node = %candidate.robo_id,
                    missing = resolution.missing.len(),
                    "candidate lacks drivers"
                );
                if best_failure
                    .as_ref()
                    .is_none_or(|best| resolution.missing.len() < best.resolution.missing.len())
                {
                    best_failure = Some(BestFailure {
                        candidate,
                        resolution,
                        attempts: attempted.clone(),
                    });
                }
                continue;
            }

            let message = json!({
                "pack": pack,
                "origin": origin,
                "target": candidate.robo_id,
                "requirements": requirements,
            });
            let address = candidate.info.address.as_str();
            let delivery = self.send_with_retry(address, &message);

            match delivery.error {
                None => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    let mut metrics = JsonMap::new();
                    metrics.insert("latency_ms".into(), json!(latency_ms));
                    metrics.insert("network_attempts".into(), json!(delivery.attempts));
                    metrics.insert("drivers_installed".into(), json!(resolution.installed));

                    let mut event = self
                        .event(&pack_id, DispatchStatus::Dispatched)
                        .with_target(&candidate.robo_id)
                        .with_address(address)
                        .with_attempts(attempted.clone())
                        .with_latency_ms(latency_ms);
                    event.metadata = metrics.clone();
                    self.monitor.record(event);

                    let mut outcome = DispatchOutcome::new(DispatchStatus::Dispatched);
                    outcome.target = Some(candidate.robo_id);
                    outcome.address = Some(address.to_string());
                    outcome.installed_drivers = resolution.installed;
                    outcome.attempted_targets = attempted;
                    outcome.errors = errors;
                    outcome.metrics = metrics;
                    return outcome;
                }
                Some(reason) => {
                    errors.push(format!("{}:{}", candidate.robo_id, reason));
                    self.monitor.record(
                        self.event(&pack_id, DispatchStatus::DeliveryFailed)
                            .with_target(&candidate.robo_id)
                            .with_address(address)
                            .with_attempts(attempted.clone())
                            .with_error(reason)
                            .with_metadata("network_attempts", json!(delivery.attempts))
                            .with_metadata("drivers_installed", json!(resolution.installed)),
                    );
                }
            }
        }

        if let Some(best) = best_failure {
            let mut outcome = DispatchOutcome::new(DispatchStatus::DriversMissing);
            outcome.metrics.insert("drivers_missing".into(), json!(best.resolution.missing));
            outcome
                .metrics
                .insert("drivers_installed".into(), json!(best.resolution.installed));
            outcome.reason = Some("Driver requirements not satisfied".to_string());
            outcome.target = Some(best.candidate.robo_id.clone());
            outcome.address = Some(best.candidate.info.address.clone());
            outcome.installed_drivers = best.resolution.installed;
            outcome.missing_drivers = best.resolution.missing;
            outcome.attempted_targets = best.attempts;
            outcome.errors = errors;

            let mut event = self
                .event(&pack_id, outcome.status)
                .with_target(&best.candidate.robo_id)
                .with_address(&best.candidate.info.address)
                .with_attempts(outcome.attempted_targets.clone())
                .with_error("Driver requirements not satisfied");
            event.metadata = outcome.metrics.clone();
            self.monitor.record(event);
            info!(pack_id = %pack_id, node = %best.candidate.robo_id, "dispatch blocked on missing drivers");
            return outcome;
        }

        let mut outcome = DispatchOutcome::new(DispatchStatus::DeliveryFailed);
        outcome.reason = Some("All candidate routes failed".to_string());
        self.monitor.record(
            self.event(&pack_id, outcome.status)
                .with_attempts(attempted.clone())
                .with_error("All candidate routes failed")
                .with_metadata("errors", json!(errors)),
        );
        warn!(pack_id = %pack_id, candidates = attempted.len(), "every candidate route failed");
        outcome.attempted_targets = attempted;
        outcome.errors = errors;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roboplane_kernel::InventoryCache;
    use roboplane_middleware::MemoryNetwork;
    use roboplane_store::{MembershipStore, MemoryStore};
    use roboplane_types::{MeshError, NodeInfo};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails every send to an address in `failing`; records the rest.
    #[derive(Default)]
    struct FlakyNetwork {
        failing: HashSet<String>,
        sends: Mutex<Vec<String>>,
        delivered: Mutex<Vec<(String, Value)>>,
    }

    impl FlakyNetwork {
        fn failing(addresses: &[&str]) -> Self {
            Self {
                failing: addresses.iter().map(|a| a.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl NetworkInterface for FlakyNetwork {
        fn send(&self, recipient: &str, message: &Value) -> Result<(), MeshError> {
            self.sends.lock().unwrap().push(recipient.to_string());
            if self.failing.contains(recipient) {
                return Err(MeshError::transport(recipient, "unreachable"));
            }
            self.delivered.lock().unwrap().push((recipient.to_string(), message.clone()));
            Ok(())
        }

        fn broadcast(&self, _: &Value) -> Result<(), MeshError> {
            Ok(())
        }

        fn receive(&self) -> Option<(String, Value)> {
            None
        }
    }

    fn directory() -> Arc<CapabilityDirectory> {
        let registry = MembershipStore::new(Arc::new(MemoryStore::new()));
        Arc::new(CapabilityDirectory::new(Arc::new(
            InventoryCache::new(registry).unwrap(),
        )))
    }

    fn lidar_requirements() -> Requirements {
        Requirements::new()
            .with_capabilities(["lidar"])
            .with_drivers(["driver.lidar"])
    }

    #[test]
    fn prefers_node_with_required_driver() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("addr-1").with_capabilities(["lidar"]))
            .unwrap();
        dir.register(
            "n2",
            NodeInfo::new("addr-2")
                .with_capabilities(["lidar"])
                .with_drivers(["driver.lidar"]),
        )
        .unwrap();
        let network = Arc::new(MemoryNetwork::new());
        let dispatcher = MeshDispatcher::new(dir, network.clone());

        let outcome = dispatcher.dispatch(
            &json!({"id": "scan"}),
            Some("origin-1"),
            Some(&lidar_requirements()),
        );
        assert_eq!(outcome.status, DispatchStatus::Dispatched);
        assert_eq!(outcome.target.as_deref(), Some("n2"));
        assert_eq!(outcome.address.as_deref(), Some("addr-2"));
        assert_eq!(outcome.attempted_targets, vec!["n2"]);
        assert_eq!(outcome.metrics["network_attempts"], 1);

        let (recipient, message) = network.receive().unwrap();
        assert_eq!(recipient, "addr-2");
        assert_eq!(message["target"], "n2");
        assert_eq!(message["origin"], "origin-1");
        assert_eq!(message["pack"]["id"], "scan");
        assert_eq!(message["requirements"]["drivers"], json!(["driver.lidar"]));
    }

    #[test]
    fn no_candidates_when_capability_is_absent() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_capabilities(["lidar"]))
            .unwrap();
        let dispatcher = MeshDispatcher::new(dir, Arc::new(MemoryNetwork::new()));
        let outcome = dispatcher.dispatch(
            &json!({"name": "photo", "requirements": {"capabilities": ["camera"]}}),
            None,
            None,
        );
        assert_eq!(outcome.status, DispatchStatus::NoCandidates);
        assert!(outcome.target.is_none());

        let events = dispatcher.monitor().recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pack_id, "photo");
        assert_eq!(events[0].status, DispatchStatus::NoCandidates);
    }

    #[test]
    fn fails_over_to_next_candidate() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("bad").with_capabilities(["arm"]))
            .unwrap();
        dir.register("n2", NodeInfo::new("good").with_capabilities(["arm"]))
            .unwrap();
        let network = Arc::new(FlakyNetwork::failing(&["bad"]));
        let dispatcher =
            MeshDispatcher::new(dir, network.clone()).with_retry(2, Duration::ZERO);

        let outcome = dispatcher.dispatch(
            &json!({"id": "grab"}),
            None,
            Some(&Requirements::new().with_capabilities(["arm"])),
        );
        assert_eq!(outcome.status, DispatchStatus::Dispatched);
        assert_eq!(outcome.target.as_deref(), Some("n2"));
        assert_eq!(outcome.attempted_targets, vec!["n1", "n2"]);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("n1:"));
        assert_eq!(*network.sends.lock().unwrap(), vec!["bad", "bad", "good"]);

        let events = dispatcher.monitor().recent(10);
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![DispatchStatus::DeliveryFailed, DispatchStatus::Dispatched]);
    }

    #[test]
    fn installs_missing_driver_before_sending() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_capabilities(["lidar"]))
            .unwrap();
        let resolver = DriverResolver::new(Arc::clone(&dir))
            .with_installer(Arc::new(|_: &str, _: &str| Ok(true)));
        let dispatcher = MeshDispatcher::new(Arc::clone(&dir), Arc::new(MemoryNetwork::new()))
            .with_resolver(resolver);

        let outcome = dispatcher.dispatch(&json!({}), None, Some(&lidar_requirements()));
        assert_eq!(outcome.status, DispatchStatus::Dispatched);
        assert_eq!(outcome.installed_drivers, vec!["driver.lidar"]);
        assert!(dir.has_driver("n1", "driver.lidar"));
    }

    #[test]
    fn reports_candidate_with_fewest_missing_drivers() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_capabilities(["arm"]))
            .unwrap();
        dir.register(
            "n2",
            NodeInfo::new("b").with_capabilities(["arm"]).with_drivers(["d1"]),
        )
        .unwrap();
        let dispatcher = MeshDispatcher::new(dir, Arc::new(MemoryNetwork::new()));
        let requirements = Requirements::new()
            .with_capabilities(["arm"])
            .with_drivers(["d1", "d2"]);

        let outcome = dispatcher.dispatch(&json!({"command": "weld"}), None, Some(&requirements));
        assert_eq!(outcome.status, DispatchStatus::DriversMissing);
        assert_eq!(outcome.target.as_deref(), Some("n2"));
        assert_eq!(outcome.missing_drivers, vec!["d2"]);
        assert_eq!(outcome.attempted_targets, vec!["n1", "n2"]);
        assert_eq!(dispatcher.monitor().failures().len(), 1);
    }

    #[test]
    fn delivery_failed_when_every_send_fails() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_capabilities(["arm"]))
            .unwrap();
        dir.register("n2", NodeInfo::new("b").with_capabilities(["arm"]))
            .unwrap();
        let dispatcher = MeshDispatcher::new(dir, Arc::new(FlakyNetwork::failing(&["a", "b"])))
            .with_retry(1, Duration::ZERO);

        let outcome = dispatcher.dispatch(
            &json!({"requirements": {"capabilities": ["arm"]}}),
            None,
            None,
        );
        assert_eq!(outcome.status, DispatchStatus::DeliveryFailed);
        assert!(outcome.target.is_none());
        assert_eq!(outcome.attempted_targets, vec!["n1", "n2"]);
        assert_eq!(outcome.errors.len(), 2);
        // one event per failed candidate plus the terminal one
        assert_eq!(dispatcher.monitor().len(), 3);
        assert_eq!(dispatcher.monitor().recent(1)[0].pack_id, "<unknown>");
    }

    #[test]
    fn backoff_grows_linearly() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_capabilities(["arm"]))
            .unwrap();
        let network = Arc::new(FlakyNetwork::failing(&["a"]));
        let dispatcher = MeshDispatcher::new(dir, network.clone())
            .with_retry(3, Duration::from_millis(20));

        let started = Instant::now();
        let outcome = dispatcher.dispatch(
            &json!({}),
            None,
            Some(&Requirements::new().with_capabilities(["arm"])),
        );
        assert_eq!(outcome.status, DispatchStatus::DeliveryFailed);
        assert_eq!(network.sends.lock().unwrap().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn repeated_dispatch_selects_same_target() {
        let dir = directory();
        for (id, addr) in [("n1", "a"), ("n2", "b"), ("n3", "c")] {
            dir.register(id, NodeInfo::new(addr).with_capabilities(["arm"]))
                .unwrap();
        }
        let dispatcher = MeshDispatcher::new(dir, Arc::new(MemoryNetwork::new()));
        let requirements = Requirements::new().with_capabilities(["arm"]);
        let first = dispatcher.dispatch(&json!({}), None, Some(&requirements));
        let second = dispatcher.dispatch(&json!({}), None, Some(&requirements));
        assert_eq!(first.target, second.target);
        assert_eq!(first.target.as_deref(), Some("n1"));
    }

    #[test]
    fn retry_attempts_is_at_least_one() {
        let dispatcher = MeshDispatcher::new(directory(), Arc::new(MemoryNetwork::new()))
            .with_retry(0, Duration::ZERO);
        assert_eq!(dispatcher.retry_attempts(), 1);
    }
}
