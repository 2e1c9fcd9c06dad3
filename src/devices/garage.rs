use tracing::{info, warn};

use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

/// Sub-topics published by the opener under `<status_topic>/status/`.
const STATUS_LEAVES: [&str; 6] = ["availability", "light", "door", "motion", "lock", "obstruction"];

const DOOR_STATES: &[(&str, f64)] = &[
    ("open", 1.0),
    ("opening", 2.0),
    ("stopped", 3.0),
    ("closing", 4.0),
    ("closed", 0.0),
];
const DOOR_CLOSED: f64 = 0.0;

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Available"),
    DriverDef::new("GV0", 0.0, 2, "Light"),
    DriverDef::new("GV1", 0.0, 25, "Door"),
    DriverDef::new("GV2", 0.0, 2, "Motion"),
    DriverDef::new("GV3", 0.0, 2, "Lock"),
    DriverDef::new("GV4", 0.0, 2, "Obstruction"),
];

/// ratgdo garage door opener.
pub struct GarageType;

impl DeviceType for GarageType {
    fn type_name(&self) -> &'static str {
        "ratgdo"
    }

    fn node_def(&self) -> &'static str {
        "mqratgdo"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Garage {
            ctx,
            base: spec.cmd_topic.clone(),
        })
    }

    fn status_topics(&self, primary: &[String]) -> Vec<String> {
        primary
            .iter()
            .flat_map(|base| {
                STATUS_LEAVES
                    .iter()
                    .map(move |leaf| format!("{base}/status/{leaf}"))
            })
            .collect()
    }
}

pub struct Garage {
    ctx: NodeContext,
    base: String,
}

impl Garage {
    const COMMANDS: CommandTable<Self> = &[
        ("QUERY", Self::cmd_query),
        ("DON", Self::cmd_light_on),
        ("DOF", Self::cmd_light_off),
        ("OPEN", Self::cmd_open),
        ("CLOSE", Self::cmd_close),
        ("STOP", Self::cmd_stop),
        ("LOCK", Self::cmd_lock),
        ("UNLOCK", Self::cmd_unlock),
        ("MCLEAR", Self::cmd_motion_clear),
    ];

    fn send(&self, leaf: &str, message: &str) -> Result<(), DeviceError> {
        self.ctx
            .publish(&format!("{}/command/{leaf}", self.base), message)
    }

    fn cmd_light_on(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("light", "on")
    }

    fn cmd_light_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("light", "off")
    }

    fn cmd_open(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("door", "open")
    }

    fn cmd_close(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("door", "close")
    }

    fn cmd_stop(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("door", "stop")
    }

    fn cmd_lock(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("lock", "lock")
    }

    fn cmd_unlock(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.send("lock", "unlock")
    }

    /// Motion is latched by the opener; clear it on its status topic.
    fn cmd_motion_clear(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx
            .publish(&format!("{}/status/motion", self.base), "Clear")?;
        self.ctx.set_driver("GV2", 0.0);
        Ok(())
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Garage {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let flag = |expected: &str| if payload == expected { 1.0 } else { 0.0 };

        match topic.rsplit('/').next().unwrap_or(topic) {
            "availability" => self.ctx.set_driver("ST", flag("online")),
            "light" => self.ctx.set_driver("GV0", flag("on")),
            "door" => {
                let state = DOOR_STATES
                    .iter()
                    .find(|(word, _)| *word == payload)
                    .map_or(DOOR_CLOSED, |(_, state)| *state);
                self.ctx.set_driver("GV1", state);
            }
            "motion" => self.ctx.set_driver("GV2", flag("detected")),
            "lock" => self.ctx.set_driver("GV3", flag("locked")),
            "obstruction" => self.ctx.set_driver("GV4", flag("obstructed")),
            other => warn!("{} unhandled topic suffix {other}", self.ctx.label()),
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
    use super::*;

    #[test]
    fn status_leaves_map_to_drivers() {
        let mut rig = rig("ratgdo", json!({}));

        rig.handler.update("online", "ratgdo/g/status/availability").unwrap();
        rig.handler.update("closing", "ratgdo/g/status/door").unwrap();
        rig.handler.update("detected", "ratgdo/g/status/motion").unwrap();
        rig.handler.update("ajar", "ratgdo/g/status/lock").unwrap();

        assert_eq!(rig.driver("ST"), Some(1.0));
        assert_eq!(rig.driver("GV1"), Some(4.0));
        assert_eq!(rig.driver("GV2"), Some(1.0));
        assert_eq!(rig.driver("GV3"), Some(0.0));
    }

    #[test]
    fn commands_use_command_subtopics() {
        let mut rig = rig("ratgdo", json!({}));

        rig.handler.command(&NodeCommand::new("OPEN")).unwrap();
        rig.handler.command(&NodeCommand::new("MCLEAR")).unwrap();

        assert_eq!(
            rig.published(),
            [
                ("cmnd/dev1/POWER/command/door".to_string(), "open".to_string()),
                ("cmnd/dev1/POWER/status/motion".to_string(), "Clear".to_string()),
            ]
        );
    }
}
