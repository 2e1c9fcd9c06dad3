use serde_json::{Map, Value};

use super::DeviceError;

/// Envelope some firmwares put around sensor readings in status replies.
pub const STATUS_WRAPPER: &str = "StatusSNS";

pub(crate) fn parse_object(payload: &str) -> Result<Map<String, Value>, DeviceError> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(invalid(payload, "expected a JSON object")),
        Err(err) => Err(invalid(payload, &err.to_string())),
    }
}

/// Strips the status envelope when present.
pub(crate) fn unwrap_status(mut map: Map<String, Value>) -> Map<String, Value> {
    match map.remove(STATUS_WRAPPER) {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            map.insert(STATUS_WRAPPER.to_string(), other);
            map
        }
        None => map,
    }
}

/// Numeric reading; numeric strings and booleans are accepted.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub(crate) fn field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(number)
}

pub(crate) fn invalid(payload: &str, reason: &str) -> DeviceError {
    DeviceError::InvalidPayload {
        payload: payload.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_envelope_is_removed() {
        let map = parse_object(r#"{"StatusSNS": {"AM2301": {"Temperature": 20}}}"#).unwrap();
        let inner = unwrap_status(map);
        assert!(inner.contains_key("AM2301"));
    }

    #[test]
    fn non_objects_are_invalid() {
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("ON").is_err());
    }

    #[test]
    fn numbers_from_strings_and_bools() {
        assert_eq!(number(&json!("21.5")), Some(21.5));
        assert_eq!(number(&json!(true)), Some(1.0));
        assert_eq!(number(&json!(null)), None);
    }
}
