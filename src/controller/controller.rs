use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeSettings, ConnectionParams};
use crate::devices::{DeviceError, DeviceTypeRegistry, NodeCommand};
use crate::discovery::{DiscoveryError, DiscoveryReport, Reconciler};
use crate::host::{
    status, HostError, HostPlatform, CONTROLLER_ADDRESS, CONTROLLER_DRIVERS, CONTROLLER_NAME,
};
use crate::mqtt::{CommandGateway, MessageRouter};
use crate::state::{BridgeState, Shared};

pub const HELLO_NOTICE: &str = "hello";
pub const WAITING_NOTICE: &str = "waiting";
pub const ERROR_NOTICE: &str = "error";

/// Commands understood by the controller node itself.
pub const DISCOVER: &str = "DISCOVER";
pub const QUERY: &str = "QUERY";

/// Topics per SUBSCRIBE request.
const SUBSCRIBE_BATCH: usize = 32;

// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("No node {0}")]
    UnknownNode(String),
}

/// The bridge's own node: owns the shared state, runs discoveries and keeps
/// the broker subscriptions in line with the topic index.
pub struct Controller {
    host: Arc<dyn HostPlatform>,
    state: Shared<BridgeState>,
    reconciler: Reconciler,
    gateway: CommandGateway,
    connected: AtomicBool,
    subscribed: Mutex<HashSet<String>>,
    heartbeat: AtomicBool,
}

impl Controller {
    pub fn new(host: Arc<dyn HostPlatform>, registry: Arc<DeviceTypeRegistry>) -> Self {
        let state = BridgeState::new();
        let gateway = CommandGateway::detached();
        let reconciler = Reconciler::new(host.clone(), state.clone(), registry, gateway.clone());
        Self {
            host,
            state,
            reconciler,
            gateway,
            connected: AtomicBool::new(false),
            subscribed: Mutex::new(HashSet::new()),
            heartbeat: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> Arc<dyn HostPlatform> {
        self.host.clone()
    }

    pub fn state(&self) -> Shared<BridgeState> {
        self.state.clone()
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    /// Router sharing this controller's state and discovery flag.
    pub fn router(&self) -> MessageRouter {
        MessageRouter::new(
            self.state.clone(),
            self.host.clone(),
            self.reconciler.running_flag(),
        )
    }

    /// Parameters resolved by the last discovery.
    pub fn connection(&self) -> (ConnectionParams, BridgeSettings) {
        let state = self.state.lock();
        (state.connection.clone(), state.settings.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn acknowledge(&self, address: &str) -> bool {
        self.reconciler.acknowledge(address)
    }

    /// Registers the controller node and runs the first discovery.
    ///
    /// # Errors
    ///
    /// Returns the discovery failure after setting `ST` to failed and leaving
    /// an error notice for the user.
    pub async fn start(&self) -> Result<DiscoveryReport, ControllerError> {
        info!("Starting {CONTROLLER_NAME} controller");
        self.host
            .register_controller(CONTROLLER_ADDRESS, CONTROLLER_NAME, CONTROLLER_DRIVERS);
        self.host.clear_notices();
        self.host.set_notice(HELLO_NOTICE, "Start-up");
        self.host
            .set_driver(CONTROLLER_ADDRESS, "ST", status::RUNNING);
        self.host.report_drivers(CONTROLLER_ADDRESS);
        self.host
            .set_notice(WAITING_NOTICE, "Waiting on valid configuration");

        match self.discover().await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!("First discovery failed: {err}");
                self.host
                    .set_notice(ERROR_NOTICE, "Error first discovery.  Check config & restart");
                self.host.set_driver(CONTROLLER_ADDRESS, "ST", status::FAILED);
                Err(err)
            }
        }
    }

    /// Completes start-up once the broker accepted the first connection.
    pub fn finish_startup(&self) {
        self.host.remove_notice(WAITING_NOTICE);
        self.query();
        self.host.remove_notice(HELLO_NOTICE);
        info!("{CONTROLLER_NAME} controller started");
    }

    /// Re-resolves the configuration and reconciles the device nodes.
    pub async fn discover(&self) -> Result<DiscoveryReport, ControllerError> {
        let report = match self.reconciler.discover().await {
            Ok(report) => report,
            Err(DiscoveryError::AlreadyRunning) => {
                return Err(DiscoveryError::AlreadyRunning.into());
            }
            Err(err) => {
                self.host
                    .set_notice(ERROR_NOTICE, &format!("Discovery failed: {err}"));
                return Err(err.into());
            }
        };
        self.host.remove_notice(ERROR_NOTICE);

        let nodes = self.device_addresses().len();
        self.host
            .set_driver(CONTROLLER_ADDRESS, "GV0", nodes as f64);
        debug!("{nodes} device nodes after discovery");

        if self.is_connected() {
            self.sync_subscriptions();
            self.query_devices(&report.created);
        }
        Ok(report)
    }

    /// Reports the drivers of the controller and of every device node.
    pub fn query(&self) {
        self.host.report_drivers(CONTROLLER_ADDRESS);
        for address in self.device_addresses() {
            self.host.report_drivers(&address);
        }
    }

    /// Asks each listed device for its current state.
    pub fn query_devices(&self, addresses: &[String]) {
        for address in addresses {
            let Some(handle) = self.host.node(address) else {
                debug!("Cannot query {address}, node not registered");
                continue;
            };
            if let Err(err) = handle.lock().query() {
                warn!("Query of {address} failed: {err}");
            };
        }
    }

    /// Runs a host command against a device node.
    pub fn command(&self, address: &str, command: &NodeCommand) -> Result<(), ControllerError> {
        let handle = self
            .host
            .node(address)
            .ok_or_else(|| ControllerError::UnknownNode(address.to_string()))?;
        info!("{address} command {}", command.cmd);
        handle.lock().command(command)?;
        Ok(())
    }

    /// Broker (re)connected: subscribe everything and refresh every device.
    pub fn on_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.subscribed.lock().clear();
        self.sync_subscriptions();
        self.query_devices(&self.device_addresses());
    }

    pub fn on_lost(&self) {
        warn!("MQTT connection lost");
        self.connected.store(false, Ordering::Release);
    }

    /// Alternates `DON` and `DOF` on the controller node and retries any
    /// subscriptions the client refused earlier.
    pub fn heartbeat(&self) {
        let was_on = self.heartbeat.fetch_xor(true, Ordering::AcqRel);
        let command = if was_on { "DOF" } else { "DON" };
        debug!("heartbeat {command}");
        self.host.report_cmd(CONTROLLER_ADDRESS, command);

        if self.is_connected() {
            self.sync_subscriptions();
        }
    }

    pub fn stop(&self) {
        info!("Stopping {CONTROLLER_NAME} controller");
        self.host.set_driver(CONTROLLER_ADDRESS, "ST", status::STOPPED);
        self.host.clear_notices();
        self.connected.store(false, Ordering::Release);
        if let Some(transport) = self.gateway.transport() {
            if let Err(err) = transport.disconnect() {
                warn!("MQTT disconnect failed: {err}");
            }
        }
    }

    fn device_addresses(&self) -> Vec<String> {
        self.host
            .node_addresses()
            .into_iter()
            .filter(|address| address != CONTROLLER_ADDRESS)
            .collect()
    }

    /// Subscribes new index topics and drops the ones no longer bound.
    ///
    /// Requests the client refuses are left pending for the next sync.
    fn sync_subscriptions(&self) {
        let Some(transport) = self.gateway.transport() else {
            return;
        };
        let wanted: Vec<String> = self
            .state
            .lock()
            .topics
            .topics()
            .map(str::to_string)
            .collect();
        let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();

        let mut subscribed = self.subscribed.lock();
        let mut pending = 0;

        let stale: Vec<String> = subscribed
            .iter()
            .filter(|topic| !wanted_set.contains(topic.as_str()))
            .cloned()
            .collect();
        for topic in stale {
            match transport.unsubscribe(&topic) {
                Ok(()) => {
                    info!("Unsubscribed {topic}");
                    subscribed.remove(&topic);
                }
                Err(err) => {
                    warn!("Unsubscribing {topic} failed: {err}");
                    pending += 1;
                }
            }
        }

        let missing: Vec<String> = wanted
            .into_iter()
            .filter(|topic| !subscribed.contains(topic))
            .collect();
        for batch in missing.chunks(SUBSCRIBE_BATCH) {
            match transport.subscribe_many(batch) {
                Ok(()) => {
                    debug!("Subscribed {batch:?}");
                    subscribed.extend(batch.iter().cloned());
                }
                Err(err) => {
                    warn!("Subscribing {} topics failed: {err}", batch.len());
                    pending += batch.len();
                }
            }
        }

        if pending > 0 {
            warn!("{pending} topics left to sync, retrying on next heartbeat");
        }
    }
}
