use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use super::ConfigError;

/// Flat key/value parameter storage as exposed by the host platform.
///
/// Values stay loosely typed: `devlist` may arrive either as a JSON string or
/// as an already structured object, ports may be numbers or strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSource {
    values: BTreeMap<String, Value>,
}

impl ParamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert, mostly used by tests and embedders.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the parameter as text, treating empty strings and `null` as unset.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        let values = table
            .into_iter()
            .map(|(key, value)| (key, toml_to_json(value)))
            .collect();
        Ok(Self { values })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

/// Scalar to text with the "empty means unset" rule used for every
/// first-non-empty lookup.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_count_as_unset() {
        let params = ParamSource::new()
            .with("mqtt_server", "")
            .with("mqtt_user", "  ")
            .with("mqtt_port", 1883);

        assert_eq!(params.text("mqtt_server"), None);
        assert_eq!(params.text("mqtt_user"), None);
        assert_eq!(params.text("mqtt_port").as_deref(), Some("1883"));
        assert_eq!(params.text("missing"), None);
    }

    #[test]
    fn parses_toml_with_inline_devlist() {
        let params = ParamSource::from_toml_str(
            r#"
            mqtt_server = "broker.lan"
            mqtt_port = 1883
            devlist = '[{"id": "a", "type": "switch"}]'

            [[structured]]
            id = "b"
            "#,
        )
        .unwrap();

        assert_eq!(params.text("mqtt_server").as_deref(), Some("broker.lan"));
        assert_eq!(params.get("mqtt_port"), Some(&Value::from(1883)));
        assert!(params.get("devlist").unwrap().is_string());
        assert!(params.get("structured").unwrap().is_array());
    }

    #[test]
    fn rejects_broken_toml() {
        assert!(matches!(
            ParamSource::from_toml_str("mqtt_server = "),
            Err(ConfigError::Params(_))
        ));
    }
}
