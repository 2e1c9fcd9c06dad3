//! Device types and their handlers.
//!
//! Every supported `type` string maps to one [`DeviceType`] descriptor in the
//! [`DeviceTypeRegistry`]. A descriptor knows how to derive the topics of a
//! device and how to build the [`DeviceHandler`] that decodes its payloads
//! and encodes its commands. Adding a device type means adding a descriptor,
//! routing and discovery stay untouched.
//!
//! ```text
//!   "dimmer" ──► DimmerType ──new_handler──► Dimmer ──publish──► CommandGateway
//!                    │                          ▲
//!                    └── status/extra topics    └── update(payload, topic) ◄── MessageRouter
//! ```

mod analog;
mod climate;
mod dimmer;
mod distance;
mod droplet;
mod energy;
mod fan;
mod flag;
mod flood;
mod garage;
mod payload;
mod raw;
mod rgbw;
mod sensor;
mod spec;
mod switch;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::host::HostPlatform;
use crate::mqtt::{CommandGateway, TransportError};

pub use analog::ANALOG_KEY;
pub use payload::STATUS_WRAPPER;
pub use spec::{DeviceSpec, SpecError, StatusTopic};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid payload `{payload}`: {reason}")]
    InvalidPayload { payload: String, reason: String },

    #[error("unsupported command {0}")]
    UnknownCommand(String),

    #[error("invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Static description of one driver (a reported value) of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverDef {
    pub driver: &'static str,
    pub initial: f64,
    pub uom: u16,
    pub name: &'static str,
}

impl DriverDef {
    pub const fn new(driver: &'static str, initial: f64, uom: u16, name: &'static str) -> Self {
        Self {
            driver,
            initial,
            uom,
            name,
        }
    }
}

/// A command sent by the host to a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCommand {
    pub cmd: String,
    pub value: Option<String>,
    /// Named parameters, e.g. `R.uom100` for colour commands.
    pub query: BTreeMap<String, String>,
}

impl NodeCommand {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Integer query parameter, `0` when absent.
    pub fn param_int(&self, key: &str) -> Result<i64, DeviceError> {
        match self.query.get(key) {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map(|v| v as i64)
                .map_err(|_| DeviceError::InvalidArgument {
                    command: self.cmd.clone(),
                    reason: format!("{key}={raw} is not a number"),
                }),
        }
    }
}

/// Name → method table of a handler.
pub type CommandTable<H> = &'static [(&'static str, fn(&mut H, &NodeCommand) -> Result<(), DeviceError>)];

/// Looks `command` up in `table` and runs it against `handler`.
pub fn dispatch<H: 'static>(
    handler: &mut H,
    table: CommandTable<H>,
    command: &NodeCommand,
) -> Result<(), DeviceError> {
    let (_, run) = table
        .iter()
        .find(|(name, _)| *name == command.cmd)
        .ok_or_else(|| DeviceError::UnknownCommand(command.cmd.clone()))?;
    run(handler, command)
}

/// Runtime side of a device node.
pub trait DeviceHandler: Send {
    /// Applies a payload received on one of the device's topics.
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError>;

    /// Asks the device for its state and reports current drivers to the host.
    fn query(&mut self) -> Result<(), DeviceError>;

    fn command(&mut self, command: &NodeCommand) -> Result<(), DeviceError>;

    fn commands(&self) -> Vec<&'static str>;
}

pub type DeviceHandle = Arc<Mutex<Box<dyn DeviceHandler>>>;

pub fn handle(handler: Box<dyn DeviceHandler>) -> DeviceHandle {
    Arc::new(Mutex::new(handler))
}

/// Descriptor of one device type.
pub trait DeviceType: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Node definition id registered with the host.
    fn node_def(&self) -> &'static str;

    fn drivers(&self) -> &'static [DriverDef];

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler>;

    /// Topics derived from the normalized `status_topic` values.
    fn status_topics(&self, primary: &[String]) -> Vec<String> {
        primary.to_vec()
    }

    /// Topics appended after the status topics, derived from the first one.
    fn extra_topics(&self, _primary: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Device types keyed by their configuration `type` string.
pub struct DeviceTypeRegistry {
    types: HashMap<&'static str, Box<dyn DeviceType>>,
}

impl DeviceTypeRegistry {
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry with every built-in device type.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(switch::SwitchType);
        registry.register(dimmer::DimmerType);
        registry.register(fan::FanType);
        registry.register(sensor::SensorType);
        registry.register(flag::FlagType);
        registry.register(climate::ClimateType::TEMP_HUMID);
        registry.register(climate::ClimateType::TEMP);
        registry.register(climate::ClimateType::TEMP_HUMID_PRESS);
        registry.register(distance::DistanceType);
        registry.register(flood::FloodType);
        registry.register(analog::AnalogType);
        registry.register(energy::EnergyType);
        registry.register(raw::RawType);
        registry.register(rgbw::RgbwType);
        registry.register(garage::GarageType);
        registry.register(droplet::DropletType);
        registry
    }

    pub fn register(&mut self, device_type: impl DeviceType + 'static) {
        let name = device_type.type_name();
        if self.types.insert(name, Box::new(device_type)).is_some() {
            info!("Device type {name} replaced");
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn DeviceType> {
        self.types.get(type_name).map(Box::as_ref)
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DeviceTypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// What a handler needs from the outside world.
#[derive(Clone)]
pub struct NodeContext {
    address: String,
    name: String,
    host: Arc<dyn HostPlatform>,
    gateway: CommandGateway,
}

impl NodeContext {
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        host: Arc<dyn HostPlatform>,
        gateway: CommandGateway,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            host,
            gateway,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// `address:name`, used as log prefix.
    pub fn label(&self) -> String {
        format!("{}:{}", self.address, self.name)
    }

    pub fn set_driver(&self, driver: &str, value: f64) {
        self.host.set_driver(&self.address, driver, value);
    }

    /// Skips the update when the reading is missing.
    pub fn set_driver_opt(&self, driver: &str, value: Option<f64>) {
        match value {
            Some(value) => self.set_driver(driver, value),
            None => debug!("{} no value for {driver}", self.label()),
        }
    }

    pub fn report_cmd(&self, command: &str) {
        self.host.report_cmd(&self.address, command);
    }

    pub fn report_drivers(&self) {
        self.host.report_drivers(&self.address);
    }

    pub fn publish(&self, topic: &str, message: impl Into<String>) -> Result<(), DeviceError> {
        self.gateway.publish(topic, message)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_every_type() {
        let registry = DeviceTypeRegistry::builtin();
        assert_eq!(
            registry.type_names(),
            [
                "RGBW",
                "Temp",
                "TempHumid",
                "TempHumidPress",
                "analog",
                "dimmer",
                "distance",
                "droplet",
                "flag",
                "ifan",
                "ratgdo",
                "raw",
                "s31",
                "sensor",
                "shellyflood",
                "switch",
            ]
        );
        assert!(registry.get("Switch").is_none());
    }

    #[test]
    fn dispatch_rejects_unknown_commands() {
        let mut rig = testing::rig("switch", serde_json::json!({}));
        let err = rig.handler.command(&NodeCommand::new("BOGUS")).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownCommand(cmd) if cmd == "BOGUS"));
    }

    #[test]
    fn param_int_parses_or_defaults() {
        let command = NodeCommand::new("SETLED")
            .with_param("R.uom100", "12")
            .with_param("G.uom100", "x");
        assert_eq!(command.param_int("R.uom100").unwrap(), 12);
        assert_eq!(command.param_int("B.uom100").unwrap(), 0);
        assert!(command.param_int("G.uom100").is_err());
    }
}
