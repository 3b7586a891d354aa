//! Control-plane configuration – reads/writes `~/.roboplane/config.toml`.
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//!
//! # Environment overrides
//!
//! | Variable | Config field |
//! |---|---|
//! | `ROBOPLANE_STORE` | `store` (`memory` or `sqlite`) |
//! | `ROBOPLANE_SQLITE_PATH` | `sqlite_path` |
//! | `ROBOPLANE_GOSSIP_CHANNEL` | `gossip_channel` |
//! | `ROBOPLANE_HEARTBEAT_INTERVAL` | `heartbeat_interval_secs` |
//! | `ROBOPLANE_RETRY_ATTEMPTS` | `retry_attempts` |
//! | `ROBOPLANE_DISCOVERY_WS_URL` | `discovery_ws_url` |
//!
//! Values that do not parse are ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roboplane_store::StoreHandles;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::NodeAgentConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to open store: {0}")]
    Store(#[from] roboplane_store::StoreError),
}

/// Which shared-store backend to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_membership_key")]
    pub membership_key: String,

    #[serde(default = "default_heartbeat_key")]
    pub heartbeat_key: String,

    /// Task lists live under `{task_prefix}:{node id}`.
    #[serde(default = "default_task_prefix")]
    pub task_prefix: String,

    #[serde(default = "default_session_key")]
    pub session_key: String,

    #[serde(default = "default_gossip_channel")]
    pub gossip_channel: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: f64,

    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace_secs: f64,

    #[serde(default = "default_task_poll_interval")]
    pub task_poll_interval_secs: f64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,

    /// Heartbeat age after which `ControlPlane::prune_expired_nodes` evicts a node.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: f64,

    /// Sleep of the facade's listen loop when no message is waiting.
    #[serde(default = "default_listen_poll_interval")]
    pub listen_poll_interval_ms: u64,

    #[serde(default)]
    pub store: StoreBackend,

    /// Database file for [`StoreBackend::Sqlite`]. Defaults to
    /// `~/.roboplane/mesh.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    /// WebSocket gossip feed used when the store has no pub/sub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_ws_url: Option<String>,
}

fn default_membership_key() -> String {
    roboplane_store::membership::DEFAULT_MEMBERSHIP_KEY.to_string()
}
fn default_heartbeat_key() -> String {
    roboplane_store::heartbeat::DEFAULT_HEARTBEAT_KEY.to_string()
}
fn default_task_prefix() -> String {
    roboplane_store::tasks::DEFAULT_TASK_PREFIX.to_string()
}
fn default_session_key() -> String {
    roboplane_store::session::DEFAULT_SESSION_KEY.to_string()
}
fn default_gossip_channel() -> String {
    roboplane_middleware::discovery::DEFAULT_GOSSIP_CHANNEL.to_string()
}
fn default_heartbeat_interval() -> f64 {
    5.0
}
fn default_heartbeat_grace() -> f64 {
    15.0
}
fn default_task_poll_interval() -> f64 {
    0.25
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_backoff() -> f64 {
    0.2
}
fn default_stale_after() -> f64 {
    crate::control_plane::DEFAULT_STALE_AFTER_SECS
}
fn default_listen_poll_interval() -> u64 {
    20
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            membership_key: default_membership_key(),
            heartbeat_key: default_heartbeat_key(),
            task_prefix: default_task_prefix(),
            session_key: default_session_key(),
            gossip_channel: default_gossip_channel(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_grace_secs: default_heartbeat_grace(),
            task_poll_interval_secs: default_task_poll_interval(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            stale_after_secs: default_stale_after(),
            listen_poll_interval_ms: default_listen_poll_interval(),
            store: StoreBackend::default(),
            sqlite_path: None,
            discovery_ws_url: None,
        }
    }
}

/// Negative, NaN or infinite seconds become zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ControlPlaneConfig {
    pub fn agent_config(&self) -> NodeAgentConfig {
        NodeAgentConfig {
            heartbeat_interval: secs(self.heartbeat_interval_secs),
            heartbeat_grace: secs(self.heartbeat_grace_secs),
            task_poll_interval: secs(self.task_poll_interval_secs),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        secs(self.retry_backoff_secs)
    }

    pub fn listen_poll_interval(&self) -> Duration {
        Duration::from_millis(self.listen_poll_interval_ms)
    }

    /// Path of the SQLite database, falling back to `~/.roboplane/mesh.db`.
    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| config_dir_for_home(&home_dir()).join("mesh.db"))
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> Result<StoreHandles, ConfigError> {
        match self.store {
            StoreBackend::Memory => Ok(StoreHandles::memory()),
            StoreBackend::Sqlite => {
                let path = self.sqlite_path();
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                Ok(StoreHandles::sqlite(path)?)
            }
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".roboplane")
}

/// Return the path to `~/.roboplane/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<ControlPlaneConfig>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from `path` and apply environment overrides.
pub fn load_from(path: &Path) -> Result<Option<ControlPlaneConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: ControlPlaneConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROBOPLANE_*` environment variable overrides to `cfg`.
pub fn apply_env_overrides(cfg: &mut ControlPlaneConfig) {
    if let Ok(v) = std::env::var("ROBOPLANE_STORE")
        && let Ok(store) = v.parse::<StoreBackend>()
    {
        cfg.store = store;
    }
    if let Ok(v) = std::env::var("ROBOPLANE_SQLITE_PATH") {
        cfg.sqlite_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ROBOPLANE_GOSSIP_CHANNEL") {
        cfg.gossip_channel = v;
    }
    if let Ok(v) = std::env::var("ROBOPLANE_HEARTBEAT_INTERVAL")
        && let Ok(secs) = v.parse::<f64>()
        && secs > 0.0
    {
        cfg.heartbeat_interval_secs = secs;
    }
    if let Ok(v) = std::env::var("ROBOPLANE_RETRY_ATTEMPTS")
        && let Ok(attempts) = v.parse::<u32>()
    {
        cfg.retry_attempts = attempts;
    }
    if let Ok(v) = std::env::var("ROBOPLANE_DISCOVERY_WS_URL") {
        cfg.discovery_ws_url = Some(v);
    }
}

/// Save the config to disk, creating `~/.roboplane/` if necessary.
pub fn save(cfg: &ControlPlaneConfig) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to `path` with owner-only permissions on Unix.
pub fn save_to(cfg: &ControlPlaneConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Held by every test that reads or writes `ROBOPLANE_*` variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ControlPlaneConfig::default();
        assert_eq!(cfg.membership_key, "mesh:nodes");
        assert_eq!(cfg.gossip_channel, "mesh:gossip");
        assert_eq!(cfg.retry_attempts, 2);
        assert!((cfg.retry_backoff().as_secs_f64() - 0.2).abs() < 1e-9);
        assert_eq!(cfg.agent_config(), NodeAgentConfig::default());
        assert_eq!(cfg.store, StoreBackend::Memory);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: ControlPlaneConfig =
            toml::from_str("store = \"sqlite\"\nretry_attempts = 5\n").unwrap();
        assert_eq!(cfg.store, StoreBackend::Sqlite);
        assert_eq!(cfg.retry_attempts, 5);
        assert_eq!(cfg.heartbeat_interval_secs, 5.0);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&ControlPlaneConfig::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let _env = env_guard();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = ControlPlaneConfig {
            discovery_ws_url: Some("ws://hub:9000/gossip".to_string()),
            stale_after_secs: 12.5,
            ..ControlPlaneConfig::default()
        };
        save_to(&cfg, &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.discovery_ws_url.as_deref(), Some("ws://hub:9000/gossip"));
        assert_eq!(loaded.stale_after_secs, 12.5);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "retry_attempts = \"many\"").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn config_path_points_to_roboplane_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".roboplane"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let _env = env_guard();
        // SAFETY: every test touching these variables holds ENV_LOCK.
        unsafe {
            std::env::set_var("ROBOPLANE_STORE", "SQLite");
            std::env::set_var("ROBOPLANE_GOSSIP_CHANNEL", "fleet:gossip");
            std::env::set_var("ROBOPLANE_RETRY_ATTEMPTS", "not-a-number");
            std::env::set_var("ROBOPLANE_HEARTBEAT_INTERVAL", "2.5");
        }
        let mut cfg = ControlPlaneConfig::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("ROBOPLANE_STORE");
            std::env::remove_var("ROBOPLANE_GOSSIP_CHANNEL");
            std::env::remove_var("ROBOPLANE_RETRY_ATTEMPTS");
            std::env::remove_var("ROBOPLANE_HEARTBEAT_INTERVAL");
        }
        assert_eq!(cfg.store, StoreBackend::Sqlite);
        assert_eq!(cfg.gossip_channel, "fleet:gossip");
        assert_eq!(cfg.retry_attempts, 2);
        assert_eq!(cfg.heartbeat_interval_secs, 2.5);
    }

    #[test]
    fn open_sqlite_store_creates_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = ControlPlaneConfig {
            store: StoreBackend::Sqlite,
            sqlite_path: Some(dir.path().join("nested").join("mesh.db")),
            ..ControlPlaneConfig::default()
        };
        let handles = cfg.open_store().expect("open");
        assert!(handles.pubsub.is_none());
        assert!(dir.path().join("nested").join("mesh.db").exists());
    }
}
