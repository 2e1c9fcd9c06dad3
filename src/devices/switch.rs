use tracing::{debug, info, warn};

use super::payload::invalid;
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const OFF: f64 = 0.0;
const ON: f64 = 100.0;
const UNKNOWN: f64 = 101.0;

const DRIVERS: &[DriverDef] = &[DriverDef::new("ST", OFF, 78, "Power")];

pub struct SwitchType;

impl DeviceType for SwitchType {
    fn type_name(&self) -> &'static str {
        "switch"
    }

    fn node_def(&self) -> &'static str {
        "MQSW"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Switch {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            on: false,
        })
    }
}

/// Relay style device speaking plain `ON` / `OFF`.
pub struct Switch {
    ctx: NodeContext,
    cmd_topic: String,
    on: bool,
}

impl Switch {
    const COMMANDS: CommandTable<Self> = &[
        ("DON", Self::cmd_on),
        ("DOF", Self::cmd_off),
        ("QUERY", Self::cmd_query),
    ];

    fn cmd_on(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "ON")
    }

    fn cmd_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "OFF")
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Switch {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        match payload.trim().to_ascii_uppercase().as_str() {
            "ON" => {
                self.ctx.set_driver("ST", ON);
                if !self.on {
                    self.on = true;
                    self.ctx.report_cmd("DON");
                }
            }
            "OFF" => {
                self.ctx.set_driver("ST", OFF);
                if self.on {
                    self.on = false;
                    self.ctx.report_cmd("DOF");
                }
            }
            _ => {
                warn!("{} unexpected payload on {topic}", self.ctx.label());
                self.ctx.set_driver("ST", UNKNOWN);
                return Err(invalid(payload, "expected ON or OFF"));
            }
        }
        debug!("{} state on={}", self.ctx.label(), self.on);
        Ok(())
    }

    fn query(&mut self) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "")?;
        self.ctx.report_drivers();
        Ok(())
    }

    fn command(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
        dispatch(self, Self::COMMANDS, command)
    }

    fn commands(&self) -> Vec<&'static str> {
        Self::COMMANDS.iter().map(|(name, _)| *name).collect()
    }
}
