use tracing::{info, warn};

use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("GV1", 0.0, 56, "Value"),
];

pub struct RawType;

impl DeviceType for RawType {
    fn type_name(&self) -> &'static str {
        "raw"
    }

    fn node_def(&self) -> &'static str {
        "mqr"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, _spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Raw { ctx })
    }
}

/// Integer payload passed straight through.
pub struct Raw {
    ctx: NodeContext,
}

impl Raw {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Raw {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        match payload.trim().parse::<i64>() {
            Ok(value) => {
                self.ctx.set_driver("ST", 1.0);
                self.ctx.set_driver("GV1", value as f64);
            }
            Err(_) => {
                warn!("{} payload is not an integer: {payload}", self.ctx.label());
                self.ctx.set_driver("ST", 0.0);
                self.ctx.set_driver("GV1", 0.0);
            }
        }
        Ok(())
    }

    fn query(&mut self) -> Result<(), DeviceError> {
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::rig;

    #[test]
    fn integers_only() {
        let mut rig = rig("raw", json!({}));

        rig.handler.update("17", "tele/dev1/raw").unwrap();
        assert_eq!(rig.driver("GV1"), Some(17.0));

        rig.handler.update("17.5", "tele/dev1/raw").unwrap();
        assert_eq!(rig.driver("GV1"), Some(0.0));
        assert_eq!(rig.driver("ST"), Some(0.0));
    }
}
