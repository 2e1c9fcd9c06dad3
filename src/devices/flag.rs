use tracing::{info, warn};

use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

/// Payload words and the index the host displays for them.
const PAYLOAD_MAP: &[(&str, f64)] = &[
    ("OK", 0.0),
    ("NOK", 1.0),
    ("LO", 2.0),
    ("HI", 3.0),
    ("ERR", 4.0),
    ("IN", 5.0),
    ("OUT", 6.0),
    ("UP", 7.0),
    ("DOWN", 8.0),
    ("TRIGGER", 9.0),
    ("ON", 10.0),
    ("OFF", 11.0),
    ("---", 12.0),
];
const ERROR_STATE: f64 = 4.0;

const DRIVERS: &[DriverDef] = &[DriverDef::new("ST", 0.0, 25, "Status")];

pub struct FlagType;

impl DeviceType for FlagType {
    fn type_name(&self) -> &'static str {
        "flag"
    }

    fn node_def(&self) -> &'static str {
        "mqflag"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Flag {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
        })
    }
}

/// Condition flag owned by the device program.
pub struct Flag {
    ctx: NodeContext,
    cmd_topic: String,
}

impl Flag {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query), ("RESET", Self::cmd_reset)];

    fn cmd_reset(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "RESET")?;
        self.ctx.report_cmd("DOF");
        Ok(())
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Flag {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let state = PAYLOAD_MAP
            .iter()
            .find(|(word, _)| *word == payload)
            .map(|(_, state)| *state)
            .unwrap_or_else(|| {
                warn!("{} unknown flag {payload}", self.ctx.label());
                ERROR_STATE
            });
        self.ctx.set_driver("ST", state);
        self.ctx.report_cmd("DON");
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::testing::rig;
    use super::*;

    #[test]
    fn maps_words_and_flags_errors() {
        let mut rig = rig("flag", json!({}));

        rig.handler.update("TRIGGER", "stat/dev1/FLAG").unwrap();
        assert_eq!(rig.driver("ST"), Some(9.0));

        rig.handler.update("whatever", "stat/dev1/FLAG").unwrap();
        assert_eq!(rig.driver("ST"), Some(ERROR_STATE));
        assert_eq!(rig.reported(), ["DON", "DON"]);
    }

    #[test]
    fn reset_publishes_and_reports_off() {
        let mut rig = rig("flag", json!({}));
        rig.handler.command(&NodeCommand::new("RESET")).unwrap();

        assert_eq!(
            rig.published(),
            [("cmnd/dev1/POWER".to_string(), "RESET".to_string())]
        );
        assert_eq!(rig.reported(), ["DOF"]);
    }
}
