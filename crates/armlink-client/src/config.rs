//! Client configuration – reads/writes `~/.armlink/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use armlink_jogging::JoggingCodec;
use armlink_motion::{MOTION_DELTA_THRESHOLD, TelemetryCodec};
use armlink_stream::ReconnectPolicy;
use armlink_types::ArmError;
use serde::{Deserialize, Serialize};

/// How jogging commands reach the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoggingTransport {
    #[default]
    Stream,
    Rest,
}

/// Reconnect backoff in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Persisted client configuration stored in `~/.armlink/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the service instance.  A bare host gets `https://`, a
    /// host with port or an IPv4 address gets `http://`.
    #[serde(default = "default_instance_url")]
    pub instance_url: String,

    /// Cell every request and stream is scoped to.
    #[serde(default = "default_cell_id")]
    pub cell_id: String,

    /// Bearer token; sent as `token` query parameter on streams.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,

    #[serde(default)]
    pub telemetry_schema: TelemetryCodec,

    #[serde(default)]
    pub jogging_transport: JoggingTransport,

    #[serde(default)]
    pub jogging_codec: JoggingCodec,

    /// Default jogging velocity in degrees per second.
    #[serde(default = "default_jogging_velocity")]
    pub jogging_velocity: f64,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Bound on waiting for the first telemetry frame at connect.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_motion_delta_threshold")]
    pub motion_delta_threshold: f64,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("instance_url", &self.instance_url)
            .field("cell_id", &self.cell_id)
            .field(
                "access_token",
                if self.access_token.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("telemetry_schema", &self.telemetry_schema)
            .field("jogging_transport", &self.jogging_transport)
            .field("jogging_codec", &self.jogging_codec)
            .field("jogging_velocity", &self.jogging_velocity)
            .field("ack_timeout_ms", &self.ack_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("motion_delta_threshold", &self.motion_delta_threshold)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

fn default_instance_url() -> String {
    "http://localhost".to_string()
}
fn default_cell_id() -> String {
    "cell".to_string()
}
fn default_jogging_velocity() -> f64 {
    10.0
}
fn default_ack_timeout_ms() -> u64 {
    2_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_motion_delta_threshold() -> f64 {
    MOTION_DELTA_THRESHOLD
}
fn default_initial_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance_url: default_instance_url(),
            cell_id: default_cell_id(),
            access_token: String::new(),
            telemetry_schema: TelemetryCodec::default(),
            jogging_transport: JoggingTransport::default(),
            jogging_codec: JoggingCodec::default(),
            jogging_velocity: default_jogging_velocity(),
            ack_timeout_ms: default_ack_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            motion_delta_threshold: default_motion_delta_threshold(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
        }
    }

    /// The access token, if one is configured.
    pub fn token(&self) -> Option<&str> {
        (!self.access_token.is_empty()).then_some(self.access_token.as_str())
    }
}

/// Return the path to `~/.armlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<ClientConfig>, ArmError> {
    load_from(&config_path())
}

/// Load the config file if present, otherwise defaults; environment
/// overrides apply either way.
pub fn load_or_default() -> Result<ClientConfig, ArmError> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = ClientConfig::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Load the config from a specific path.
pub fn load_from(path: &Path) -> Result<Option<ClientConfig>, ArmError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ArmError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: ClientConfig = toml::from_str(&raw)
        .map_err(|e| ArmError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARMLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMLINK_INSTANCE_URL` | `instance_url` |
/// | `ARMLINK_CELL_ID` | `cell_id` |
/// | `ARMLINK_ACCESS_TOKEN` | `access_token` |
/// | `ARMLINK_TELEMETRY_SCHEMA` | `telemetry_schema` |
/// | `ARMLINK_JOGGING_VELOCITY` | `jogging_velocity` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut ClientConfig) {
    if let Ok(v) = std::env::var("ARMLINK_INSTANCE_URL") {
        cfg.instance_url = v;
    }
    if let Ok(v) = std::env::var("ARMLINK_CELL_ID") {
        cfg.cell_id = v;
    }
    if let Ok(v) = std::env::var("ARMLINK_ACCESS_TOKEN") {
        cfg.access_token = v;
    }
    if let Ok(v) = std::env::var("ARMLINK_TELEMETRY_SCHEMA")
        && let Ok(schema) = v.parse::<TelemetryCodec>()
    {
        cfg.telemetry_schema = schema;
    }
    if let Ok(v) = std::env::var("ARMLINK_JOGGING_VELOCITY")
        && let Ok(velocity) = v.parse::<f64>()
        && velocity.is_finite()
        && velocity >= 0.0
    {
        cfg.jogging_velocity = velocity;
    }
}

/// Save the config to disk, creating `~/.armlink/` if necessary.
pub fn save(cfg: &ClientConfig) -> Result<(), ArmError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub fn save_to(cfg: &ClientConfig, path: &Path) -> Result<(), ArmError> {
    let io_err = |what: &str, e: std::io::Error| ArmError::Config(format!("{what} {}: {e}", path.display()));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create directory for", e))?;
        // Owner-only directory (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to restrict directory of", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ArmError::Config(format!("failed to serialize config: {e}")))?;
    // Owner-only file (rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| io_err("failed to write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("failed to write", e))?;
    Ok(())
}
