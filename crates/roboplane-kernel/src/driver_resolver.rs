//! [`DriverResolver`] – make sure a node has the drivers a job needs.
//!
//! Resolution never fails. Installer errors, installer panics and request
//! handler errors are logged and degrade to "still missing".
//!
//! | Target | Behaviour |
//! |---|---|
//! | unknown | every required driver is missing; the request handler is asked for all of them |
//! | known | missing drivers are installed one by one via the installer, successes are marked available in the directory, and whatever remains is passed to the request handler |

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use indexmap::IndexSet;
use roboplane_types::MeshError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability_directory::CapabilityDirectory;

/// Installs `driver` on `target`. `Ok(false)` is a failed install.
pub type DriverInstaller = Arc<dyn Fn(&str, &str) -> Result<bool, MeshError> + Send + Sync>;

/// Asks an out-of-band process to provide drivers for `target`.
pub type DriverRequestHandler = Arc<dyn Fn(&str, &[String]) -> Result<(), MeshError> + Send + Sync>;

/// Outcome of [`DriverResolver::resolve`]. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverResolution {
    pub target: String,
    pub satisfied: bool,
    /// Drivers still missing after installation attempts.
    pub missing: Vec<String>,
    pub installed: Vec<String>,
    /// Drivers handed to the request handler.
    pub requested: Vec<String>,
}

pub struct DriverResolver {
    directory: Arc<CapabilityDirectory>,
    installer: Option<DriverInstaller>,
    request_handler: Option<DriverRequestHandler>,
}

impl DriverResolver {
    pub fn new(directory: Arc<CapabilityDirectory>) -> Self {
        Self {
            directory,
            installer: None,
            request_handler: None,
        }
    }

    pub fn with_installer(mut self, installer: DriverInstaller) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_request_handler(mut self, handler: DriverRequestHandler) -> Self {
        self.request_handler = Some(handler);
        self
    }

    pub fn directory(&self) -> &Arc<CapabilityDirectory> {
        &self.directory
    }

    /// Resolve `required` drivers for `target`.
    pub fn resolve(&self, target: &str, required: &[String], request_missing: bool) -> DriverResolution {
        let required: Vec<String> = required
            .iter()
            .filter(|d| !d.is_empty())
            .collect::<IndexSet<&String>>()
            .into_iter()
            .cloned()
            .collect();

        let record = match self.directory.get(target) {
            Ok(record) => record,
            Err(e) => {
                warn!(target_node = %target, error = %e, "inventory lookup failed; treating node as unknown");
                None
            }
        };

        let Some(record) = record else {
            let missing = required;
            let requested = self.request(target, &missing, request_missing);
            return DriverResolution {
                target: target.to_string(),
                satisfied: missing.is_empty(),
                missing,
                installed: Vec::new(),
                requested,
            };
        };

        let missing: Vec<String> = record
            .info
            .missing_drivers(&required)
            .into_iter()
            .cloned()
            .collect();

        let mut installed = Vec::new();
        if let Some(installer) = &self.installer {
            for driver in &missing {
                if self.install(installer, target, driver) {
                    if let Err(e) = self.directory.mark_driver_available(target, driver) {
                        warn!(target_node = %target, driver = %driver, error = %e, "could not record installed driver");
                    }
                    installed.push(driver.clone());
                }
            }
        }

        let remaining: Vec<String> = missing
            .into_iter()
            .filter(|d| !installed.contains(d))
            .collect();
        let requested = self.request(target, &remaining, request_missing);

        DriverResolution {
            target: target.to_string(),
            satisfied: remaining.is_empty(),
            missing: remaining,
            installed,
            requested,
        }
    }

    fn install(&self, installer: &DriverInstaller, target: &str, driver: &str) -> bool {
        match catch_unwind(AssertUnwindSafe(|| installer(target, driver))) {
            Ok(Ok(true)) => {
                debug!(target_node = %target, driver = %driver, "driver installed");
                true
            }
            Ok(Ok(false)) => {
                warn!(target_node = %target, driver = %driver, "driver installer declined");
                false
            }
            Ok(Err(e)) => {
                warn!(target_node = %target, driver = %driver, error = %e, "driver installation failed");
                false
            }
            Err(_) => {
                warn!(target_node = %target, driver = %driver, "driver installer panicked");
                false
            }
        }
    }

    fn request(&self, target: &str, missing: &[String], request_missing: bool) -> Vec<String> {
        if missing.is_empty() || !request_missing {
            return Vec::new();
        }
        let Some(handler) = &self.request_handler else {
            return Vec::new();
        };
        match catch_unwind(AssertUnwindSafe(|| handler(target, missing))) {
            Ok(Ok(())) => missing.to_vec(),
            Ok(Err(e)) => {
                warn!(target_node = %target, error = %e, "driver request handler failed");
                Vec::new()
            }
            Err(_) => {
                warn!(target_node = %target, "driver request handler panicked");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryCache;
    use roboplane_store::{MemoryStore, MembershipStore};
    use roboplane_types::NodeInfo;
    use std::sync::Mutex;

    fn directory() -> Arc<CapabilityDirectory> {
        let registry = MembershipStore::new(Arc::new(MemoryStore::new()));
        Arc::new(CapabilityDirectory::new(Arc::new(
            InventoryCache::new(registry).unwrap(),
        )))
    }

    fn drivers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    type Calls = Arc<Mutex<Vec<(String, Vec<String>)>>>;

    fn recording_handler() -> (DriverRequestHandler, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let handler: DriverRequestHandler = Arc::new(move |target: &str, missing: &[String]| {
            sink.lock().unwrap().push((target.to_string(), missing.to_vec()));
            Ok(())
        });
        (handler, calls)
    }

    #[test]
    fn satisfied_when_node_has_drivers() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_drivers(["d1", "d2"])).unwrap();
        let res = DriverResolver::new(dir).resolve("n1", &drivers(&["d1"]), true);
        assert!(res.satisfied);
        assert!(res.missing.is_empty());
    }

    #[test]
    fn unknown_target_requests_everything_once() {
        let (handler, calls) = recording_handler();
        let resolver = DriverResolver::new(directory()).with_request_handler(handler);
        let res = resolver.resolve("ghost", &drivers(&["d1", "d2", "d1", ""]), true);
        assert!(!res.satisfied);
        assert_eq!(res.missing, drivers(&["d1", "d2"]));
        assert_eq!(res.requested, drivers(&["d1", "d2"]));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn installer_success_marks_driver_available() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a")).unwrap();
        let installer: DriverInstaller = Arc::new(|_: &str, driver: &str| Ok(driver != "d2"));
        let (handler, calls) = recording_handler();
        let resolver = DriverResolver::new(Arc::clone(&dir))
            .with_installer(installer)
            .with_request_handler(handler);

        let res = resolver.resolve("n1", &drivers(&["d1", "d2"]), true);
        assert!(!res.satisfied);
        assert_eq!(res.installed, drivers(&["d1"]));
        assert_eq!(res.missing, drivers(&["d2"]));
        assert_eq!(res.requested, drivers(&["d2"]));
        assert!(dir.has_driver("n1", "d1"));
        assert_eq!(calls.lock().unwrap()[0], ("n1".to_string(), drivers(&["d2"])));
    }

    #[test]
    fn installer_errors_and_panics_degrade_to_missing() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a")).unwrap();
        let installer: DriverInstaller = Arc::new(|target: &str, driver: &str| {
            if driver == "boom" {
                panic!("installer exploded");
            }
            Err(MeshError::DriverInstall {
                target: target.to_string(),
                driver: driver.to_string(),
                details: "offline".to_string(),
            })
        });
        let res = DriverResolver::new(dir)
            .with_installer(installer)
            .resolve("n1", &drivers(&["d1", "boom"]), true);
        assert!(!res.satisfied);
        assert_eq!(res.missing, drivers(&["d1", "boom"]));
        assert!(res.installed.is_empty());
        assert!(res.requested.is_empty());
    }

    #[test]
    fn request_missing_false_skips_handler() {
        let (handler, calls) = recording_handler();
        let resolver = DriverResolver::new(directory()).with_request_handler(handler);
        let res = resolver.resolve("ghost", &drivers(&["d1"]), false);
        assert!(res.requested.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_request_handler_is_swallowed() {
        let handler: DriverRequestHandler =
            Arc::new(|_: &str, _: &[String]| Err(MeshError::Handler("queue full".to_string())));
        let resolver = DriverResolver::new(directory()).with_request_handler(handler);
        let res = resolver.resolve("ghost", &drivers(&["d1"]), true);
        assert!(!res.satisfied);
        assert!(res.requested.is_empty());
    }

    #[test]
    fn known_target_reports_only_absent_drivers_once() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a").with_drivers(["d2"])).unwrap();
        let res = DriverResolver::new(dir).resolve("n1", &drivers(&["d3", "d2", "d1", "d3"]), true);
        assert!(!res.satisfied);
        assert_eq!(res.missing, drivers(&["d3", "d1"]));
    }
}
