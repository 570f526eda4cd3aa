//! Gateway configuration – reads/writes `~/.cellbridge/config.toml`.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cellbridge_link::{Backoff, LinkMode};
use cellbridge_server::BridgeConfig;
use cellbridge_types::{MethodNodes, RobotNodes, TwinNodes};
use serde::{Deserialize, Serialize};

/// How the gateway holds its connection to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkModeSetting {
    /// One long-lived session, reconnected with backoff.
    #[default]
    Session,
    /// A fresh connection for every read and write.
    PerCall,
}

impl std::fmt::Display for LinkModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkModeSetting::Session => write!(f, "session"),
            LinkModeSetting::PerCall => write!(f, "per_call"),
        }
    }
}

/// Console log rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Persisted gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the hosted digital-twin node space.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Port the digital twin is served on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Node endpoint of the robot's control server.
    #[serde(default = "default_robot_url")]
    pub robot_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub link_mode: LinkModeSetting,

    /// Bound on connect and on each request to the robot.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Poll the seven state variables with one batched request.  Only for
    /// robot endpoints that answer `read_batch`; per-call links always read
    /// them one by one.
    #[serde(default)]
    pub batch_reads: bool,

    /// Run an in-process simulated cell instead of talking to `robot_url`.
    #[serde(default)]
    pub simulate_robot: bool,

    #[serde(default = "default_sim_port")]
    pub sim_port: u16,

    /// How long the simulated cell stays busy per pick-and-place.
    #[serde(default = "default_sim_cycle_ms")]
    pub sim_cycle_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    /// OTLP/HTTP collector for span export, e.g. `http://localhost:4318`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub robot_nodes: RobotNodes,

    #[serde(default)]
    pub twin_nodes: TwinNodes,

    #[serde(default)]
    pub method_nodes: MethodNodes,
}

fn default_server_name() -> String {
    "Digital Factory Transfer".to_string()
}
fn default_listen_port() -> u16 {
    4840
}
fn default_robot_url() -> String {
    "ws://192.168.158.34:4840".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_queue_capacity() -> usize {
    3
}
fn default_io_timeout_ms() -> u64 {
    5000
}
fn default_reconnect_initial_ms() -> u64 {
    250
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_sim_port() -> u16 {
    4841
}
fn default_sim_cycle_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            listen_port: default_listen_port(),
            robot_url: default_robot_url(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            link_mode: LinkModeSetting::default(),
            io_timeout_ms: default_io_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            batch_reads: false,
            simulate_robot: false,
            sim_port: default_sim_port(),
            sim_cycle_ms: default_sim_cycle_ms(),
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            robot_nodes: RobotNodes::default(),
            twin_nodes: TwinNodes::default(),
            method_nodes: MethodNodes::default(),
        }
    }
}

impl Config {
    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".to_string());
        }
        if self.io_timeout_ms == 0 {
            return Err("io_timeout_ms must be positive".to_string());
        }
        if self.reconnect_initial_ms == 0 {
            return Err("reconnect_initial_ms must be positive".to_string());
        }
        if self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err("reconnect_initial_ms must not exceed reconnect_max_ms".to_string());
        }
        Ok(())
    }

    pub fn link_mode(&self) -> LinkMode {
        match self.link_mode {
            LinkModeSetting::PerCall => LinkMode::PerCall,
            LinkModeSetting::Session => LinkMode::Session(Backoff {
                initial: Duration::from_millis(self.reconnect_initial_ms),
                max: Duration::from_millis(self.reconnect_max_ms),
            }),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            server_name: self.server_name.clone(),
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port)),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            queue_capacity: self.queue_capacity,
            robot_nodes: self.robot_nodes.clone(),
            twin_nodes: self.twin_nodes.clone(),
            method_nodes: self.method_nodes.clone(),
        }
    }
}

/// Path of the config file: `$CELLBRIDGE_CONFIG` if set, else
/// `~/.cellbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CELLBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cellbridge").join("config.toml")
}

/// Load the config, falling back to defaults when no file exists.
/// Environment overrides apply either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `CELLBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CELLBRIDGE_ROBOT_URL` | `robot_url` |
/// | `CELLBRIDGE_LISTEN_PORT` | `listen_port` |
/// | `CELLBRIDGE_POLL_MS` | `poll_interval_ms` |
/// | `CELLBRIDGE_SIMULATE` | `simulate_robot` (`1`/`true`/`0`/`false`) |
/// | `CELLBRIDGE_LOG_FORMAT` | `log_format` (`compact`/`json`) |
/// | `OTEL_EXPORTER_OTLP_ENDPOINT` | `otlp_endpoint` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CELLBRIDGE_ROBOT_URL") {
        cfg.robot_url = v;
    }
    if let Ok(v) = std::env::var("CELLBRIDGE_LISTEN_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.listen_port = port;
    }
    if let Ok(v) = std::env::var("CELLBRIDGE_POLL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("CELLBRIDGE_SIMULATE") {
        match v.as_str() {
            "1" | "true" => cfg.simulate_robot = true,
            "0" | "false" => cfg.simulate_robot = false,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("CELLBRIDGE_LOG_FORMAT") {
        match v.as_str() {
            "json" => cfg.log_format = LogFormat::Json,
            "compact" => cfg.log_format = LogFormat::Compact,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        && !v.is_empty()
    {
        cfg.otlp_endpoint = Some(v);
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
