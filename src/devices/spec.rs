use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::value_text as config_text;
use crate::topics::normalize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("device entry is not an object")]
    NotAnObject,

    #[error("device {id}: missing required field `{field}`")]
    MissingField { id: String, field: &'static str },

    #[error("device {id}: field `{field}` {reason}")]
    InvalidField {
        id: String,
        field: &'static str,
        reason: &'static str,
    },

    #[error("device {id}: id yields an empty address")]
    EmptyAddress { id: String },

    #[error("device {id}: type {kind} is not supported")]
    UnknownType { id: String, kind: String },

    #[error("device {id}: address {address} is already taken by another device")]
    DuplicateAddress { id: String, address: String },
}

/// `status_topic` may be a single topic or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTopic {
    Single(String),
    List(Vec<String>),
}

/// One validated device entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub status_topic: StatusTopic,
    pub cmd_topic: String,
    pub sensor_id: Option<String>,
    /// Type specific keys, passed through untouched.
    pub extra: Map<String, Value>,
}

const ID: &str = "id";
const TYPE: &str = "type";
const NAME: &str = "name";
const STATUS_TOPIC: &str = "status_topic";
const CMD_TOPIC: &str = "cmd_topic";
const SENSOR_ID: &str = "sensor_id";

impl DeviceSpec {
    /// Validates a raw directory entry.
    pub fn from_entry(entry: &Value) -> Result<Self, SpecError> {
        let Value::Object(map) = entry else {
            return Err(SpecError::NotAnObject);
        };

        let id = map
            .get(ID)
            .and_then(config_text)
            .ok_or_else(|| SpecError::MissingField {
                id: "<unknown>".to_string(),
                field: ID,
            })?;

        let required = |field: &'static str| {
            map.get(field)
                .filter(|value| !value.is_null())
                .ok_or_else(|| SpecError::MissingField {
                    id: id.clone(),
                    field,
                })
        };

        let status_topic = match required(STATUS_TOPIC)? {
            Value::String(topic) => StatusTopic::Single(topic.clone()),
            Value::Array(items) => StatusTopic::List(
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .filter(|topics| !topics.is_empty())
                    .ok_or_else(|| SpecError::InvalidField {
                        id: id.clone(),
                        field: STATUS_TOPIC,
                        reason: "must be a non-empty list of strings",
                    })?,
            ),
            _ => {
                return Err(SpecError::InvalidField {
                    id: id.clone(),
                    field: STATUS_TOPIC,
                    reason: "must be a string or a list of strings",
                })
            }
        };

        let cmd_topic = required(CMD_TOPIC)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SpecError::InvalidField {
                id: id.clone(),
                field: CMD_TOPIC,
                reason: "must be a string",
            })?;

        let kind = required(TYPE)?
            .as_str()
            .filter(|kind| !kind.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SpecError::InvalidField {
                id: id.clone(),
                field: TYPE,
                reason: "must be a non-empty string",
            })?;

        let name = map.get(NAME).and_then(config_text).unwrap_or_else(|| id.clone());
        let sensor_id = map.get(SENSOR_ID).and_then(config_text);

        let extra = map
            .iter()
            .filter(|(key, _)| {
                ![ID, TYPE, NAME, STATUS_TOPIC, CMD_TOPIC, SENSOR_ID].contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id,
            kind,
            name,
            status_topic,
            cmd_topic,
            sensor_id,
            extra,
        })
    }

    pub fn status_topics(&self) -> &[String] {
        match &self.status_topic {
            StatusTopic::Single(topic) => std::slice::from_ref(topic),
            StatusTopic::List(topics) => topics,
        }
    }

    /// True when the second path segment of any normalized status topic is
    /// exactly `segment`.
    pub fn listens_under(&self, segment: &str, status_prefix: Option<&str>) -> bool {
        self.status_topics().iter().any(|topic| {
            let topic = normalize(Some(topic), status_prefix);
            topic.split('/').nth(1) == Some(segment)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn valid_entry_with_defaults() {
        let spec = DeviceSpec::from_entry(&json!({
            "id": "Kitchen_Light",
            "type": "switch",
            "status_topic": "stat/kitchen/POWER",
            "cmd_topic": "cmnd/kitchen/power",
            "retain_hint": true
        }))
        .unwrap();

        assert_eq!(spec.name, "Kitchen_Light");
        assert_eq!(spec.kind, "switch");
        assert_eq!(spec.status_topics(), ["stat/kitchen/POWER"]);
        assert_eq!(spec.sensor_id, None);
        assert_eq!(spec.extra.get("retain_hint"), Some(&json!(true)));
    }

    #[test]
    fn numeric_sensor_id_and_id_are_accepted() {
        let spec = DeviceSpec::from_entry(&json!({
            "id": 42, "type": "analog", "sensor_id": 1,
            "status_topic": "tele/a/SENSOR", "cmd_topic": "cmnd/a/Status"
        }))
        .unwrap();

        assert_eq!(spec.id, "42");
        assert_eq!(spec.sensor_id.as_deref(), Some("1"));
    }

    #[test]
    fn each_required_field_is_enforced() {
        let full = json!({
            "id": "a", "type": "switch",
            "status_topic": "s", "cmd_topic": "c"
        });

        for field in ["type", "status_topic", "cmd_topic"] {
            let mut entry = full.clone();
            entry.as_object_mut().unwrap().remove(field);
            assert!(
                matches!(
                    DeviceSpec::from_entry(&entry),
                    Err(SpecError::MissingField { field: f, .. }) if f == field
                ),
                "{field} should be required"
            );
        }

        let mut no_id = full.clone();
        no_id.as_object_mut().unwrap().remove("id");
        assert!(matches!(
            DeviceSpec::from_entry(&no_id),
            Err(SpecError::MissingField { field: "id", .. })
        ));
    }

    #[test]
    fn listens_under_matches_whole_segments() {
        let pool = DeviceSpec::from_entry(&json!({
            "id": "pool", "type": "Temp", "sensor_id": "DS18B20-1",
            "status_topic": "~pool/SENSOR", "cmd_topic": "cmnd/pool/Status"
        }))
        .unwrap();

        assert!(pool.listens_under("pool", Some("tele/")));
        assert!(!pool.listens_under("poo", Some("tele/")));
        assert!(!pool.listens_under("SENSOR", Some("tele/")));
        assert!(!pool.listens_under("pool", None));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        assert_eq!(
            DeviceSpec::from_entry(&json!("switch")),
            Err(SpecError::NotAnObject)
        );
        assert!(matches!(
            DeviceSpec::from_entry(&json!({
                "id": "a", "type": "switch", "status_topic": [], "cmd_topic": "c"
            })),
            Err(SpecError::InvalidField { field: "status_topic", .. })
        ));
        assert!(matches!(
            DeviceSpec::from_entry(&json!({
                "id": "a", "type": "switch", "status_topic": "s", "cmd_topic": 5
            })),
            Err(SpecError::InvalidField { field: "cmd_topic", .. })
        ));
    }
}
