//! Host automation platform contract.
//!
//! The bridge never owns device nodes itself. It asks the host to create and
//! remove them, pushes driver values and command reports, and surfaces its
//! own health through the controller node's status driver and free-text
//! notices. Node creation is asynchronous: the host confirms each node with a
//! [`HostEvent::NodeAdded`] on its event channel.

mod local;

use thiserror::Error;

use crate::config::{ConfigError, ParamSource};
use crate::devices::{DeviceHandle, DeviceHandler, DriverDef, NodeCommand};

pub use local::{LocalHost, ParamStore};

/// Address of the bridge's own controller node.
pub const CONTROLLER_ADDRESS: &str = "mqctrl";
pub const CONTROLLER_NAME: &str = "MQTT";
pub const CONTROLLER_NODE_DEF: &str = "mqctrl";

/// Controller `ST` values.
pub mod status {
    pub const STOPPED: f64 = 0.0;
    pub const RUNNING: f64 = 1.0;
    pub const FAILED: f64 = 2.0;
}

pub const CONTROLLER_DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", status::RUNNING, 25, "Controller Status"),
    DriverDef::new("GV0", 0.0, 107, "NumberOfNodes"),
];

#[derive(Debug, Error)]
pub enum HostError {
    #[error("node {0} already exists")]
    DuplicateNode(String),

    #[error("node {0} does not exist")]
    UnknownNode(String),

    #[error("host event channel closed")]
    EventChannelClosed,

    #[error(transparent)]
    Params(#[from] ConfigError),
}

/// Events the host raises towards the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Creation acknowledgment for a requested node.
    NodeAdded { address: String },
    /// User asked for a rediscovery.
    Discover,
    /// User asked the controller to report all nodes.
    Query,
    /// Command addressed at one node.
    Command { address: String, command: NodeCommand },
    Stop,
}

/// Everything needed to create one device node.
pub struct NodeRegistration {
    pub address: String,
    pub name: String,
    pub node_def: &'static str,
    pub drivers: &'static [DriverDef],
    pub handler: Box<dyn DeviceHandler>,
}

impl std::fmt::Debug for NodeRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistration")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("node_def", &self.node_def)
            .finish_non_exhaustive()
    }
}

pub trait HostPlatform: Send + Sync {
    /// Current parameter storage.
    fn params(&self) -> Result<ParamSource, HostError>;

    /// Registers the bridge's own controller node.
    fn register_controller(&self, address: &str, name: &str, drivers: &'static [DriverDef]);

    /// Addresses of every node, controller included.
    fn node_addresses(&self) -> Vec<String>;

    fn node(&self, address: &str) -> Option<DeviceHandle>;

    /// Requests node creation; completion is signalled by [`HostEvent::NodeAdded`].
    fn add_node(&self, registration: NodeRegistration) -> Result<(), HostError>;

    fn remove_node(&self, address: &str) -> Result<(), HostError>;

    fn set_driver(&self, address: &str, driver: &str, value: f64);

    fn report_cmd(&self, address: &str, command: &str);

    fn report_drivers(&self, address: &str);

    fn set_notice(&self, key: &str, text: &str);

    fn remove_notice(&self, key: &str);

    fn clear_notices(&self);
}
