//! Configuration resolution.
//!
//! Two competing device sources are merged into one [`DeviceDirectory`], and
//! connection parameters are resolved alongside it:
//!
//! ```text
//!   devfile (YAML) ──► devices ──┐
//!                                ├── upsert by id ──► DeviceDirectory
//!   devlist (JSON) ──► entries ──┘
//!
//!   parameter ─► devfile `general` ─► compiled default   (first non-empty wins)
//! ```
//!
//! A resolve call either succeeds completely or returns a [`ConfigError`];
//! nothing is partially applied.

mod devfile;
mod error;
mod params;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

pub use devfile::{parse_devlist, DeviceDirectory, Devfile};
pub use error::ConfigError;
pub use params::ParamSource;

pub(crate) use params::value_text;

pub const DEVFILE: &str = "devfile";
pub const DEVLIST: &str = "devlist";
pub const MQTT_SERVER: &str = "mqtt_server";
pub const MQTT_PORT: &str = "mqtt_port";
pub const MQTT_USER: &str = "mqtt_user";
pub const MQTT_PASSWORD: &str = "mqtt_password";
pub const STATUS_PREFIX: &str = "status_prefix";
pub const CMD_PREFIX: &str = "cmd_prefix";
pub const HEARTBEAT_SECS: &str = "heartbeat_secs";
pub const NODE_CREATE_TIMEOUT_SECS: &str = "node_create_timeout_secs";
pub const MQTT_RETRY_SECS: &str = "mqtt_retry_secs";

/// Environment variable overriding the parameter file location.
pub const PARAMS_ENV: &str = "MQTT_POLY_PARAMS";

pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1884;
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

/// Broker connection settings plus the topic placeholder prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub status_prefix: Option<String>,
    pub cmd_prefix: Option<String>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            status_prefix: None,
            cmd_prefix: None,
        }
    }
}

impl ConnectionParams {
    fn resolve(params: &ParamSource, general: &BTreeMap<String, Value>) -> Self {
        let layered = Layered { params, general };
        let defaults = Self::default();

        Self {
            server: layered.text(MQTT_SERVER).unwrap_or(defaults.server),
            port: layered.port(MQTT_PORT).unwrap_or(defaults.port),
            user: layered.text(MQTT_USER).unwrap_or(defaults.user),
            password: layered.text(MQTT_PASSWORD).unwrap_or(defaults.password),
            status_prefix: layered.text(STATUS_PREFIX),
            cmd_prefix: layered.text(CMD_PREFIX),
        }
    }
}

/// Runtime knobs for the bridge itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub heartbeat: Duration,
    /// `None` waits for node creation acknowledgments indefinitely.
    pub node_create_timeout: Option<Duration>,
    pub creation_poll: Duration,
    pub mqtt_retry: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            node_create_timeout: None,
            creation_poll: Duration::from_millis(200),
            mqtt_retry: Duration::from_secs(3),
        }
    }
}

impl BridgeSettings {
    fn resolve(params: &ParamSource, general: &BTreeMap<String, Value>) -> Self {
        let layered = Layered { params, general };
        let defaults = Self::default();

        Self {
            heartbeat: layered
                .secs(HEARTBEAT_SECS)
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.heartbeat),
            node_create_timeout: layered.secs(NODE_CREATE_TIMEOUT_SECS).filter(|d| !d.is_zero()),
            creation_poll: defaults.creation_poll,
            mqtt_retry: layered
                .secs(MQTT_RETRY_SECS)
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.mqtt_retry),
        }
    }
}

/// Everything one resolve call produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub directory: DeviceDirectory,
    pub connection: ConnectionParams,
    pub settings: BridgeSettings,
}

/// Merges devfile and devlist into a device directory and resolves the
/// connection parameters.
pub fn resolve(params: &ParamSource) -> Result<ResolvedConfig, ConfigError> {
    let devfile = params.text(DEVFILE);
    let devlist = params.get(DEVLIST).filter(|value| !is_blank(value));

    if devfile.is_none() && devlist.is_none() {
        return Err(ConfigError::NoDeviceSource);
    }

    let mut directory = DeviceDirectory::new();
    let mut general = BTreeMap::new();

    if let Some(path) = devfile {
        let file = Devfile::load(Path::new(&path))?;
        directory = DeviceDirectory::from_entries(file.devices);
        general = file.general;
    }

    if let Some(devlist) = devlist {
        for entry in parse_devlist(devlist)? {
            directory.upsert(entry);
        }
    }

    let connection = ConnectionParams::resolve(params, &general);
    let settings = BridgeSettings::resolve(params, &general);

    info!(
        "Resolved {} devices, broker {}:{}",
        directory.len(),
        connection.server,
        connection.port
    );
    Ok(ResolvedConfig {
        directory,
        connection,
        settings,
    })
}

/// Parameter file location: `$MQTT_POLY_PARAMS`, else
/// `<config dir>/mqtt-poly/params.toml`.
pub fn params_path() -> PathBuf {
    if let Some(path) = std::env::var_os(PARAMS_ENV).filter(|path| !path.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        })
        .join("mqtt-poly")
        .join("params.toml")
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Parameter first, then the devfile `general` section.
struct Layered<'a> {
    params: &'a ParamSource,
    general: &'a BTreeMap<String, Value>,
}

impl Layered<'_> {
    fn text(&self, key: &str) -> Option<String> {
        self.params
            .text(key)
            .or_else(|| self.general.get(key).and_then(value_text))
    }

    /// Non-numeric values fall through to the next layer instead of failing.
    fn port(&self, key: &str) -> Option<u16> {
        let layers = [self.params.get(key), self.general.get(key)];
        layers
            .into_iter()
            .flatten()
            .filter_map(value_text)
            .find_map(|raw| match raw.parse::<u16>() {
                Ok(port) if port != 0 => Some(port),
                _ => {
                    warn!("Ignoring invalid {key} value `{raw}`");
                    None
                }
            })
    }

    fn secs(&self, key: &str) -> Option<Duration> {
        let raw = self.text(key)?;
        match raw.parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                warn!("Ignoring invalid {key} value `{raw}`");
                None
            }
        }
    }
}
