use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::params::value_text;
use super::ConfigError;

/// Parsed devfile: the `devices` list plus the flattened `general` overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Devfile {
    pub devices: Vec<Value>,
    pub general: BTreeMap<String, Value>,
}

impl Devfile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: Option<RawDevfile> =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Devfile {
                path: path.to_path_buf(),
                source,
            })?;
        let raw = raw.unwrap_or_default();

        let devices = match raw.devices {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => return Err(ConfigError::MissingDevices(path.to_path_buf())),
            Some(_) => return Err(invalid(path, "`devices` must be a list")),
        };

        let general = match raw.general {
            Some(section) => flatten_general(&section, path)?,
            None => BTreeMap::new(),
        };

        debug!(
            "Loaded devfile {} with {} devices and {} general keys",
            path.display(),
            devices.len(),
            general.len()
        );
        Ok(Self { devices, general })
    }
}

/// Top-level shape of the YAML document.
#[derive(Debug, Default, Deserialize)]
struct RawDevfile {
    #[serde(default)]
    devices: Option<Value>,
    #[serde(default)]
    general: Option<Value>,
}

/// `general` is written as a list of one-key maps; a plain map is accepted too.
fn flatten_general(section: &Value, path: &Path) -> Result<BTreeMap<String, Value>, ConfigError> {
    let mut general = BTreeMap::new();
    match section {
        Value::Null => {}
        Value::Object(map) => {
            general.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Value::Array(items) => {
            for item in items {
                let Value::Object(map) = item else {
                    return Err(invalid(path, "`general` entries must be maps"));
                };
                general.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        _ => return Err(invalid(path, "`general` must be a list of maps")),
    }
    Ok(general)
}

fn invalid(path: &Path, reason: &str) -> ConfigError {
    ConfigError::InvalidDevfile {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

/// Decodes a devlist parameter.
///
/// Accepts a JSON string or an already structured value holding either a list
/// of device objects, a single device object, or an object with a `devices`
/// list.
pub fn parse_devlist(raw: &Value) -> Result<Vec<Value>, ConfigError> {
    let decoded;
    let value = match raw {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text)?;
            &decoded
        }
        other => other,
    };

    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => match map.get("devices") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(ConfigError::InvalidDevlist),
            None => Ok(vec![value.clone()]),
        },
        _ => Err(ConfigError::InvalidDevlist),
    }
}

/// Ordered device entries keyed by `id`.
///
/// Entries stay raw until discovery validates them, so a malformed device
/// only costs itself and not its siblings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDirectory {
    entries: Vec<Value>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Value>) -> Self {
        Self { entries }
    }

    /// Replaces the entry with the same `id` wholesale, or appends.
    pub fn upsert(&mut self, entry: Value) {
        let Some(id) = entry_id(&entry) else {
            warn!("Devlist entry without `id` appended as-is: {entry}");
            self.entries.push(entry);
            return;
        };

        match self
            .entries
            .iter_mut()
            .find(|existing| entry_id(existing).as_deref() == Some(id.as_str()))
        {
            Some(existing) => {
                debug!("Devlist overrides device {id}");
                *existing = entry;
            }
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_id(entry: &Value) -> Option<String> {
    entry.get("id").and_then(value_text)
}
