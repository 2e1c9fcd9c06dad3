use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{HostError, HostEvent, HostPlatform, NodeRegistration};
use crate::config::ParamSource;
use crate::devices::{self, DeviceHandle, DriverDef, NodeCommand};

/// Reported commands kept per node.
const MAX_REPORTED: usize = 32;

/// Where [`LocalHost`] reads its parameters from.
#[derive(Debug, Clone)]
pub enum ParamStore {
    /// TOML file, re-read on every access so edits apply on the next discovery.
    File(PathBuf),
    Fixed(ParamSource),
}

#[derive(Debug, Clone, Copy)]
struct DriverState {
    value: f64,
    uom: u16,
}

struct LocalNode {
    name: String,
    node_def: &'static str,
    handle: Option<DeviceHandle>,
    drivers: BTreeMap<String, DriverState>,
    // Most recent last, trimmed to MAX_REPORTED
    reported: Vec<String>,
    updated: Option<DateTime<Local>>,
}

impl LocalNode {
    fn new(name: &str, node_def: &'static str, drivers: &[DriverDef]) -> Self {
        Self {
            name: name.to_string(),
            node_def,
            handle: None,
            drivers: drivers
                .iter()
                .map(|def| {
                    (
                        def.driver.to_string(),
                        DriverState {
                            value: def.initial,
                            uom: def.uom,
                        },
                    )
                })
                .collect(),
            reported: Vec::new(),
            updated: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, LocalNode>,
    notices: BTreeMap<String, String>,
}

/// In-process host: keeps nodes, drivers and notices in memory and logs
/// every change.
pub struct LocalHost {
    params: Mutex<ParamStore>,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl LocalHost {
    pub fn new(params: ParamStore) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let host = Self {
            params: Mutex::new(params),
            inner: Mutex::new(Inner::default()),
            events,
        };
        (host, receiver)
    }

    pub fn with_params(params: ParamSource) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        Self::new(ParamStore::Fixed(params))
    }

    pub fn set_params(&self, params: ParamSource) {
        *self.params.lock() = ParamStore::Fixed(params);
    }

    /// Creates a bare node with initial driver values and no handler.
    pub fn register_drivers(&self, address: &str, drivers: &[DriverDef]) {
        self.inner
            .lock()
            .nodes
            .entry(address.to_string())
            .or_insert_with(|| LocalNode::new(address, "", drivers));
    }

    pub fn driver(&self, address: &str, driver: &str) -> Option<f64> {
        let inner = self.inner.lock();
        inner
            .nodes
            .get(address)
            .and_then(|node| node.drivers.get(driver))
            .map(|state| state.value)
    }

    pub fn reported_commands(&self, address: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .nodes
            .get(address)
            .map(|node| node.reported.clone())
            .unwrap_or_default()
    }

    pub fn notices(&self) -> BTreeMap<String, String> {
        self.inner.lock().notices.clone()
    }

    pub fn node_def(&self, address: &str) -> Option<&'static str> {
        self.inner.lock().nodes.get(address).map(|node| node.node_def)
    }

    pub fn last_update(&self, address: &str) -> Option<DateTime<Local>> {
        self.inner.lock().nodes.get(address).and_then(|node| node.updated)
    }

    pub fn request_discover(&self) -> Result<(), HostError> {
        self.emit(HostEvent::Discover)
    }

    pub fn request_query(&self) -> Result<(), HostError> {
        self.emit(HostEvent::Query)
    }

    pub fn request_stop(&self) -> Result<(), HostError> {
        self.emit(HostEvent::Stop)
    }

    pub fn send_command(&self, address: &str, command: NodeCommand) -> Result<(), HostError> {
        self.emit(HostEvent::Command {
            address: address.to_string(),
            command,
        })
    }

    fn emit(&self, event: HostEvent) -> Result<(), HostError> {
        self.events
            .send(event)
            .map_err(|_| HostError::EventChannelClosed)
    }
}

impl HostPlatform for LocalHost {
    fn params(&self) -> Result<ParamSource, HostError> {
        match &*self.params.lock() {
            ParamStore::File(path) => Ok(ParamSource::load(path)?),
            ParamStore::Fixed(params) => Ok(params.clone()),
        }
    }

    fn register_controller(&self, address: &str, name: &str, drivers: &'static [DriverDef]) {
        let mut inner = self.inner.lock();
        inner
            .nodes
            .entry(address.to_string())
            .or_insert_with(|| LocalNode::new(name, super::CONTROLLER_NODE_DEF, drivers));
        info!("Controller node {address} registered");
    }

    fn node_addresses(&self) -> Vec<String> {
        self.inner.lock().nodes.keys().cloned().collect()
    }

    fn node(&self, address: &str) -> Option<DeviceHandle> {
        self.inner
            .lock()
            .nodes
            .get(address)
            .and_then(|node| node.handle.clone())
    }

    fn add_node(&self, registration: NodeRegistration) -> Result<(), HostError> {
        let NodeRegistration {
            address,
            name,
            node_def,
            drivers,
            handler,
        } = registration;

        {
            let mut inner = self.inner.lock();
            if inner.nodes.contains_key(&address) {
                return Err(HostError::DuplicateNode(address));
            }
            let mut node = LocalNode::new(&name, node_def, drivers);
            node.handle = Some(devices::handle(handler));
            inner.nodes.insert(address.clone(), node);
        }
        info!("Added node {address} ({node_def}) {name}");

        if let Err(err) = self.emit(HostEvent::NodeAdded {
            address: address.clone(),
        }) {
            self.inner.lock().nodes.remove(&address);
            return Err(err);
        }
        Ok(())
    }

    fn remove_node(&self, address: &str) -> Result<(), HostError> {
        match self.inner.lock().nodes.remove(address) {
            Some(node) => {
                info!("Removed node {address} {}", node.name);
                Ok(())
            }
            None => Err(HostError::UnknownNode(address.to_string())),
        }
    }

    fn set_driver(&self, address: &str, driver: &str, value: f64) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.nodes.get_mut(address) else {
            warn!("set_driver on unknown node {address}");
            return;
        };
        let state = node
            .drivers
            .entry(driver.to_string())
            .or_insert(DriverState { value, uom: 0 });
        if state.value != value {
            debug!("{address} {driver} {} -> {value}", state.value);
        }
        state.value = value;
        node.updated = Some(Local::now());
    }

    fn report_cmd(&self, address: &str, command: &str) {
        let mut inner = self.inner.lock();
        match inner.nodes.get_mut(address) {
            Some(node) => {
                info!("{address} reports {command}");
                node.reported.push(command.to_string());
                let excess = node.reported.len().saturating_sub(MAX_REPORTED);
                node.reported.drain(..excess);
            }
            None => warn!("report_cmd on unknown node {address}"),
        }
    }

    fn report_drivers(&self, address: &str) {
        let inner = self.inner.lock();
        if let Some(node) = inner.nodes.get(address) {
            for (driver, state) in &node.drivers {
                debug!("{address} {driver}={} uom={}", state.value, state.uom);
            }
        }
    }

    fn set_notice(&self, key: &str, text: &str) {
        info!("Notice {key}: {text}");
        self.inner
            .lock()
            .notices
            .insert(key.to_string(), text.to_string());
    }

    fn remove_notice(&self, key: &str) {
        self.inner.lock().notices.remove(key);
    }

    fn clear_notices(&self) {
        self.inner.lock().notices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceError, DeviceHandler};

    struct Inert;

    impl DeviceHandler for Inert {
        fn update(&mut self, _: &str, _: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        fn query(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn command(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
            Err(DeviceError::UnknownCommand(command.cmd.clone()))
        }
        fn commands(&self) -> Vec<&'static str> {
            Vec::new()
        }
    }

    const DRIVERS: &[DriverDef] = &[DriverDef::new("ST", 5.0, 2, "Status")];

    fn registration(address: &str) -> NodeRegistration {
        NodeRegistration {
            address: address.to_string(),
            name: address.to_uppercase(),
            node_def: "test",
            drivers: DRIVERS,
            handler: Box::new(Inert),
        }
    }

    #[tokio::test]
    async fn add_node_acknowledges_on_event_channel() {
        let (host, mut events) = LocalHost::with_params(ParamSource::new());

        host.add_node(registration("a")).unwrap();

        assert_eq!(
            events.recv().await,
            Some(HostEvent::NodeAdded {
                address: "a".to_string()
            })
        );
        assert_eq!(host.driver("a", "ST"), Some(5.0));
        assert!(host.node("a").is_some());
        assert!(matches!(
            host.add_node(registration("a")),
            Err(HostError::DuplicateNode(_))
        ));
    }

    #[test]
    fn closed_channel_rolls_back_creation() {
        let (host, events) = LocalHost::with_params(ParamSource::new());
        drop(events);

        assert!(matches!(
            host.add_node(registration("a")),
            Err(HostError::EventChannelClosed)
        ));
        assert!(host.node_addresses().is_empty());
    }

    #[test]
    fn drivers_notices_and_removal() {
        let (host, _events) = LocalHost::with_params(ParamSource::new());
        host.add_node(registration("a")).unwrap();

        host.set_driver("a", "ST", 1.0);
        host.report_cmd("a", "DON");
        host.set_notice("mqtt", "Waiting on user MQTT connection");

        assert_eq!(host.driver("a", "ST"), Some(1.0));
        assert_eq!(host.reported_commands("a"), ["DON"]);
        assert!(host.last_update("a").is_some());
        assert_eq!(host.notices().len(), 1);

        host.clear_notices();
        host.remove_node("a").unwrap();
        assert!(host.notices().is_empty());
        assert!(matches!(host.remove_node("a"), Err(HostError::UnknownNode(_))));
    }

    #[test]
    fn reported_commands_keep_only_the_latest() {
        let (host, _events) = LocalHost::with_params(ParamSource::new());
        host.add_node(registration("a")).unwrap();

        for i in 0..(MAX_REPORTED + 10) {
            host.report_cmd("a", if i % 2 == 0 { "DON" } else { "DOF" });
        }

        let reported = host.reported_commands("a");
        assert_eq!(reported.len(), MAX_REPORTED);
        assert_eq!(reported.last().map(String::as_str), Some("DOF"));
    }

    #[test]
    fn file_params_are_reread() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mqtt_server = \"one\"").unwrap();
        let (host, _events) = LocalHost::new(ParamStore::File(file.path().to_path_buf()));
        assert_eq!(host.params().unwrap().text("mqtt_server").as_deref(), Some("one"));

        let mut file = std::fs::File::create(file.path()).unwrap();
        writeln!(file, "mqtt_server = \"two\"").unwrap();
        assert_eq!(host.params().unwrap().text("mqtt_server").as_deref(), Some("two"));
    }
}
