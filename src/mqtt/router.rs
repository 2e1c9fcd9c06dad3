use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::devices::{ANALOG_KEY, STATUS_WRAPPER};
use crate::host::HostPlatform;
use crate::state::{BridgeState, Shared};

/// Key families whose entries each belong to a separate sensor device.
const SENSOR_FAMILIES: &[&str] = &["DS18B20", "AM2301", "BME280"];

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Discovery was running; the message was not looked at.
    Dropped,
    /// Handed to these nodes, in dispatch order.
    Dispatched(Vec<String>),
    /// No node claims the topic.
    Unrouted,
}

/// Resolves inbound `(topic, payload)` pairs to device nodes.
#[derive(Clone)]
pub struct MessageRouter {
    state: Shared<BridgeState>,
    host: Arc<dyn HostPlatform>,
    discovery_running: Arc<AtomicBool>,
}

impl MessageRouter {
    pub fn new(
        state: Shared<BridgeState>,
        host: Arc<dyn HostPlatform>,
        discovery_running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            host,
            discovery_running,
        }
    }

    /// Routes one message. Never fails: handler errors and misses are logged.
    pub fn route(&self, topic: &str, payload: &str) -> RouteOutcome {
        if self.discovery_running.load(Ordering::Acquire) {
            debug!("Discovery running, dropping message on {topic}");
            return RouteOutcome::Dropped;
        }

        let addresses = self.resolve(topic, payload);
        if addresses.is_empty() {
            debug!("No device for {topic}, dropping {payload}");
            return RouteOutcome::Unrouted;
        }

        for address in &addresses {
            self.dispatch(address, topic, payload);
        }
        RouteOutcome::Dispatched(addresses)
    }

    fn resolve(&self, topic: &str, payload: &str) -> Vec<String> {
        let state = self.state.lock();
        let by_topic = || state.topics.lookup(topic).map(str::to_string);

        let Some(object) = decode(payload) else {
            return by_topic().into_iter().collect();
        };

        let sensors = embedded_sensors(&object);
        if sensors.is_empty() {
            return by_topic().into_iter().collect();
        }

        let segment = topic.split('/').nth(1);
        let mut addresses = Vec::new();
        for sensor in sensors {
            let owner = segment
                .and_then(|segment| state.sensor_owner(&sensor, segment))
                .or_else(by_topic);
            match owner {
                Some(address) if !addresses.contains(&address) => addresses.push(address),
                Some(_) => {}
                None => debug!("No device for sensor {sensor} on {topic}"),
            }
        }
        addresses
    }

    fn dispatch(&self, address: &str, topic: &str, payload: &str) {
        let Some(handle) = self.host.node(address) else {
            debug!("Node {address} bound to {topic} is not registered");
            return;
        };

        info!("{address} <- {topic}: {payload}");
        if let Err(err) = handle.lock().update(payload, topic) {
            error!("{address} failed to process message on {topic}: {err}");
        };
    }
}

/// JSON object payload with the status envelope removed.
fn decode(payload: &str) -> Option<Map<String, Value>> {
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(payload) else {
        return None;
    };
    match object.remove(STATUS_WRAPPER) {
        Some(Value::Object(inner)) => Some(inner),
        Some(other) => {
            object.insert(STATUS_WRAPPER.to_string(), other);
            Some(object)
        }
        None => Some(object),
    }
}

/// Sensor ids found in the multi-sensor containers of a payload.
fn embedded_sensors(object: &Map<String, Value>) -> Vec<String> {
    let mut sensors: Vec<String> = match object.get(ANALOG_KEY) {
        Some(Value::Object(channels)) => channels.keys().cloned().collect(),
        _ => Vec::new(),
    };
    for family in SENSOR_FAMILIES {
        sensors.extend(object.keys().filter(|key| key.contains(family)).cloned());
    }
    sensors
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn decode_unwraps_status_envelope() {
        let decoded = decode(r#"{"StatusSNS":{"DS18B20-1":{"Temperature":20}}}"#).unwrap();
        assert!(decoded.contains_key("DS18B20-1"));

        assert!(decode("ON").is_none());
        assert!(decode("42").is_none());
        assert!(decode(r#"["a"]"#).is_none());
    }

    #[test]
    fn embedded_sensors_cover_every_family() {
        let sensors = embedded_sensors(&object(json!({
            "Time": "2024-01-01T00:00:00",
            "ANALOG": {"A0": 1, "A1": 2},
            "DS18B20-1": {"Temperature": 20},
            "DS18B20-2": {"Temperature": 21},
            "AM2301": {"Humidity": 40},
            "BME280": {"Pressure": 1000},
            "TempUnit": "C",
        })));
        assert_eq!(
            sensors,
            ["A0", "A1", "DS18B20-1", "DS18B20-2", "AM2301", "BME280"]
        );
    }

    #[test]
    fn plain_payloads_have_no_embedded_sensors() {
        assert!(embedded_sensors(&object(json!({"POWER": "ON"}))).is_empty());
        assert!(embedded_sensors(&object(json!({"ANALOG": 3}))).is_empty());
    }
}
