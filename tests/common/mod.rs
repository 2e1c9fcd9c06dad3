#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mqtt_poly::config::ParamSource;
use mqtt_poly::controller::controller_handle::pump_host_events;
use mqtt_poly::controller::Controller;
use mqtt_poly::devices::DeviceTypeRegistry;
use mqtt_poly::host::LocalHost;
use mqtt_poly::mqtt::MemoryTransport;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Controller on a [`LocalHost`] with a recording transport attached and the
/// host event pump running.
pub struct Bridge {
    pub host: Arc<LocalHost>,
    pub controller: Arc<Controller>,
    pub transport: Arc<MemoryTransport>,
    pub cancel: CancellationToken,
}

impl Bridge {
    pub fn new(params: ParamSource) -> Self {
        let (host, events) = LocalHost::with_params(params);
        let host = Arc::new(host);
        let controller = Arc::new(Controller::new(
            host.clone(),
            Arc::new(DeviceTypeRegistry::builtin()),
        ));
        let transport = Arc::new(MemoryTransport::new());
        controller.gateway().attach(transport.clone());

        let cancel = CancellationToken::new();
        tokio::spawn(pump_host_events(controller.clone(), events, cancel.clone()));

        Self {
            host,
            controller,
            transport,
            cancel,
        }
    }

    pub fn with_devices(devices: Value) -> Self {
        Self::new(devlist(devices))
    }

    pub fn topics(&self) -> Vec<String> {
        let state = self.controller.state();
        let state = state.lock();
        state.topics.topics().map(str::to_string).collect()
    }

    pub fn owner(&self, topic: &str) -> Option<String> {
        let state = self.controller.state();
        let state = state.lock();
        state.topics.lookup(topic).map(str::to_string)
    }

    /// Device node addresses, controller excluded.
    pub fn nodes(&self) -> Vec<String> {
        use mqtt_poly::host::{HostPlatform, CONTROLLER_ADDRESS};

        self.host
            .node_addresses()
            .into_iter()
            .filter(|address| address != CONTROLLER_ADDRESS)
            .collect()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn devlist(devices: Value) -> ParamSource {
    ParamSource::new().with("devlist", devices)
}

pub fn device(id: &str, kind: &str, status: &str, cmd: &str) -> Value {
    json!({"id": id, "type": kind, "status_topic": status, "cmd_topic": cmd})
}

/// Polls `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
