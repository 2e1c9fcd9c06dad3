use tracing::{info, warn};

use super::payload::{field, invalid, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const FAN_OFF: i64 = 0;
const FAN_HIGH: i64 = 3;

const DRIVERS: &[DriverDef] = &[DriverDef::new("ST", 0.0, 25, "Power")];

pub struct FanType;

impl DeviceType for FanType {
    fn type_name(&self) -> &'static str {
        "ifan"
    }

    fn node_def(&self) -> &'static str {
        "mqfan"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Fan {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            speed: FAN_OFF,
        })
    }
}

/// Multi speed fan controller (`FanSpeed` 0..=3).
pub struct Fan {
    ctx: NodeContext,
    cmd_topic: String,
    speed: i64,
}

impl Fan {
    const COMMANDS: CommandTable<Self> = &[
        ("QUERY", Self::cmd_query),
        ("DON", Self::cmd_on),
        ("DOF", Self::cmd_off),
        ("FDUP", Self::cmd_speed_up),
        ("FDDOWN", Self::cmd_speed_down),
    ];

    fn apply(&mut self, speed: i64) -> Result<(), DeviceError> {
        self.speed = speed;
        self.ctx.set_driver("ST", speed as f64);
        self.ctx.publish(&self.cmd_topic, speed.to_string())
    }

    fn cmd_on(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
        let speed = command
            .value
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|speed| (FAN_OFF..=FAN_HIGH).contains(speed))
            .unwrap_or_else(|| {
                warn!("{} missing or invalid speed, using high", self.ctx.label());
                FAN_HIGH
            });
        self.apply(speed)
    }

    fn cmd_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.apply(FAN_OFF)
    }

    fn cmd_speed_up(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "+")
    }

    fn cmd_speed_down(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, "-")
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Fan {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;
        let speed = field(&data, "FanSpeed")
            .map(|v| v as i64)
            .ok_or_else(|| invalid(payload, "missing FanSpeed"))?;
        if !(FAN_OFF..=FAN_HIGH).contains(&speed) {
            return Err(invalid(payload, "FanSpeed out of range"));
        }

        if self.speed == FAN_OFF && speed > FAN_OFF {
            self.ctx.report_cmd("DON");
        } else if self.speed > FAN_OFF && speed == FAN_OFF {
            self.ctx.report_cmd("DOF");
        }
        self.speed = speed;
        self.ctx.set_driver("ST", speed as f64);
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
    fn speed_transitions_report_on_off() {
        let mut rig = rig("ifan", json!({}));

        rig.handler.update(r#"{"FanSpeed": 2}"#, "stat/dev1/RESULT").unwrap();
        rig.handler.update(r#"{"FanSpeed": 3}"#, "stat/dev1/RESULT").unwrap();
        rig.handler.update(r#"{"FanSpeed": 0}"#, "stat/dev1/RESULT").unwrap();

        assert_eq!(rig.reported(), ["DON", "DOF"]);
        assert!(rig.handler.update(r#"{"FanSpeed": 7}"#, "t").is_err());
        assert_eq!(rig.driver("ST"), Some(0.0));
    }

    #[test]
    fn on_defaults_to_high() {
        let mut rig = rig("ifan", json!({}));

        rig.handler.command(&NodeCommand::new("DON").with_value("9")).unwrap();
        rig.handler.command(&NodeCommand::new("DON").with_value("1")).unwrap();
        rig.handler.command(&NodeCommand::new("FDUP")).unwrap();

        let payloads: Vec<_> = rig.published().into_iter().map(|(_, p)| p).collect();
        assert_eq!(payloads, ["3", "1", "+"]);
        assert_eq!(rig.driver("ST"), Some(1.0));
    }
}
