//! Configuration Vault – reads/writes `~/.skyfuse/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use skyfuse_middleware::ChannelMap;
use skyfuse_perception::Vector3;
use skyfuse_perception::fusion::FusionConfig;
use skyfuse_perception::transform::{FrameTransform, TfEngine};
use skyfuse_runtime::NodeConfig;
use skyfuse_types::FusionError;

/// A fixed transform between two named frames (e.g. camera mount).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTransform {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default)]
    pub roll: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub yaw: f32,
}

/// Persisted configuration stored in `~/.skyfuse/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// UDP address the ingest adapter listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Where replay-frame requests are sent; unset disables them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_target: Option<String>,

    #[serde(default)]
    pub channels: ChannelMap,

    #[serde(default = "default_map_frame")]
    pub map_frame: String,

    /// Frame of the stereo sensor; fused output is always in `map_frame`.
    #[serde(default = "default_body_frame")]
    pub body_frame: String,

    #[serde(default = "default_map_resolution")]
    pub map_resolution: f64,

    /// Fusion passes slower than this are logged.
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: f64,

    /// Longest the node waits for traffic before running a fusion step.
    #[serde(default = "default_drain_wait_ms")]
    pub drain_wait_ms: u64,

    /// Reviewed-frame log; unset keeps reviews in the log output only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_log: Option<PathBuf>,

    #[serde(default = "default_static_transforms")]
    pub static_transforms: Vec<StaticTransform>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:7667".to_string()
}
fn default_map_frame() -> String {
    "local".to_string()
}
fn default_body_frame() -> String {
    "body".to_string()
}
fn default_map_resolution() -> f64 {
    0.5
}
fn default_latency_budget_ms() -> f64 {
    8.3
}
fn default_drain_wait_ms() -> u64 {
    1
}
fn default_static_transforms() -> Vec<StaticTransform> {
    vec![StaticTransform {
        parent: default_map_frame(),
        child: default_body_frame(),
        translation: [0.0; 3],
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            replay_target: None,
            channels: ChannelMap::default(),
            map_frame: default_map_frame(),
            body_frame: default_body_frame(),
            map_resolution: default_map_resolution(),
            latency_budget_ms: default_latency_budget_ms(),
            drain_wait_ms: default_drain_wait_ms(),
            review_log: None,
            static_transforms: default_static_transforms(),
        }
    }
}

impl Config {
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, FusionError> {
        parse_addr("bind_addr", &self.bind_addr)
    }

    pub fn replay_socket_addr(&self) -> Result<Option<SocketAddr>, FusionError> {
        self.replay_target
            .as_deref()
            .map(|raw| parse_addr("replay_target", raw))
            .transpose()
    }

    /// Validate the numeric settings and build the node configuration.
    pub fn node_config(&self) -> Result<NodeConfig, FusionError> {
        if !(self.latency_budget_ms.is_finite() && self.latency_budget_ms > 0.0) {
            return Err(FusionError::Config(format!(
                "latency_budget_ms must be positive, got {}",
                self.latency_budget_ms
            )));
        }
        if !(self.map_resolution.is_finite() && self.map_resolution > 0.0) {
            return Err(FusionError::Config(format!(
                "map_resolution must be positive, got {}",
                self.map_resolution
            )));
        }
        Ok(NodeConfig {
            fusion: FusionConfig {
                map_frame: self.map_frame.clone(),
                body_frame: self.body_frame.clone(),
                latency_budget: Duration::from_secs_f64(self.latency_budget_ms / 1_000.0),
                ..FusionConfig::default()
            },
            drain_wait: Duration::from_millis(self.drain_wait_ms),
            map_resolution: self.map_resolution,
            review_log: self.review_log.clone(),
        })
    }

    /// The frame graph seeded with every static transform.
    pub fn frame_graph(&self) -> TfEngine {
        let mut tf = TfEngine::new();
        for t in &self.static_transforms {
            let [x, y, z] = t.translation;
            tf.set_transform(
                &t.parent,
                &t.child,
                FrameTransform::from_euler(t.roll, t.pitch, t.yaw, Vector3::new(x, y, z)),
            );
        }
        tf
    }
}

fn parse_addr(field: &str, raw: &str) -> Result<SocketAddr, FusionError> {
    raw.parse()
        .map_err(|e| FusionError::Config(format!("{field} '{raw}' is not a socket address: {e}")))
}

/// Return the path to `~/.skyfuse/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".skyfuse").join("config.toml")
}

/// Load the config from disk (defaults when absent) with `SKYFUSE_*`
/// overrides applied.
pub fn load() -> Result<Config, FusionError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, FusionError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        FusionError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw).map_err(|e| {
        FusionError::Config(format!("failed to parse config at {}: {e}", path.display()))
    })?;
    Ok(Some(cfg))
}

/// Apply `SKYFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SKYFUSE_BIND_ADDR` | `bind_addr` |
/// | `SKYFUSE_MAP_FRAME` | `map_frame` |
/// | `SKYFUSE_BODY_FRAME` | `body_frame` |
/// | `SKYFUSE_LATENCY_BUDGET_MS` | `latency_budget_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SKYFUSE_BIND_ADDR") {
        cfg.bind_addr = v;
    }
    if let Ok(v) = std::env::var("SKYFUSE_MAP_FRAME") {
        cfg.map_frame = v;
    }
    if let Ok(v) = std::env::var("SKYFUSE_BODY_FRAME") {
        cfg.body_frame = v;
    }
    if let Ok(v) = std::env::var("SKYFUSE_LATENCY_BUDGET_MS")
        && let Ok(ms) = v.parse::<f64>()
        && ms > 0.0
    {
        cfg.latency_budget_ms = ms;
    }
}

/// Save the config to disk, creating `~/.skyfuse/` if necessary.
pub fn save(cfg: &Config) -> Result<(), FusionError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), FusionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            FusionError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| FusionError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        FusionError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
