//! State shared between the reconciler, the router and the controller.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BridgeSettings, ConnectionParams};
use crate::devices::DeviceSpec;
use crate::topics::TopicIndex;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Result of the last discovery: validated devices, their topic bindings and
/// the parameters they were resolved with.
#[derive(Debug, Default)]
pub struct BridgeState {
    pub devices: Vec<DeviceSpec>,
    pub topics: TopicIndex,
    pub connection: ConnectionParams,
    pub settings: BridgeSettings,
}

impl BridgeState {
    pub fn new() -> Shared<Self> {
        shared(Self::default())
    }

    /// Address of the device whose `sensor_id` is `sensor` and whose status
    /// topic sits under the same second path segment.
    pub fn sensor_owner(&self, sensor: &str, segment: &str) -> Option<String> {
        let prefix = self.connection.status_prefix.as_deref();
        self.devices
            .iter()
            .find(|spec| {
                spec.sensor_id.as_deref() == Some(sensor) && spec.listens_under(segment, prefix)
            })
            .map(|spec| crate::topics::address_for(&spec.id))
    }
}
