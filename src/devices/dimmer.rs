use tracing::{info, warn};

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};
use crate::topics;

const DRIVERS: &[DriverDef] = &[DriverDef::new("ST", 0.0, 51, "Status")];

const MIN_LEVEL: i64 = 0;
const MAX_LEVEL: i64 = 100;
const STEP: i64 = 10;
/// Level used when switched on from zero without an explicit value.
const ON_LEVEL: i64 = 10;

pub struct DimmerType;

impl DeviceType for DimmerType {
    fn type_name(&self) -> &'static str {
        "dimmer"
    }

    fn node_def(&self) -> &'static str {
        "mqdimmer"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Dimmer {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            level: 0,
        })
    }

    /// Dimmers echo their state on a `RESULT` topic next to the status topic.
    fn extra_topics(&self, primary: &str) -> Vec<String> {
        vec![topics::sibling(primary, "RESULT")]
    }
}

pub struct Dimmer {
    ctx: NodeContext,
    cmd_topic: String,
    level: i64,
}

impl Dimmer {
    const COMMANDS: CommandTable<Self> = &[
        ("QUERY", Self::cmd_query),
        ("DON", Self::cmd_on),
        ("DOF", Self::cmd_off),
        ("BRT", Self::cmd_brighten),
        ("DIM", Self::cmd_dim),
    ];

    fn set_level(&mut self, level: i64, publish: bool) -> Result<(), DeviceError> {
        self.level = level.clamp(MIN_LEVEL, MAX_LEVEL);
        self.ctx.set_driver("ST", self.level as f64);
        if publish {
            self.ctx.publish(&self.cmd_topic, self.level.to_string())?;
        }
        Ok(())
    }

    fn cmd_on(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
        let level = match command.value.as_deref().map(str::trim) {
            None => self.level,
            Some(raw) => raw.parse::<f64>().map(|v| v as i64).unwrap_or_else(|_| {
                warn!("{} invalid level {raw}, keeping {}", self.ctx.label(), self.level);
                self.level
            }),
        };
        let level = if level == 0 { ON_LEVEL } else { level };
        self.set_level(level, true)
    }

    fn cmd_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.set_level(0, true)
    }

    fn cmd_brighten(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.set_level(self.level + STEP, true)
    }

    fn cmd_dim(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.set_level(self.level - STEP, true)
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Dimmer {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;
        let power = data.get("POWER").and_then(|v| v.as_str());
        let level = field(&data, "Dimmer").map(|v| v as i64);

        match (power, level) {
            (Some("ON"), level) => {
                let fallback = if self.level > 0 { self.level } else { MAX_LEVEL };
                self.ctx.report_cmd("DON");
                self.set_level(level.unwrap_or(fallback), false)
            }
            (Some("OFF"), _) => {
                self.ctx.report_cmd("DOF");
                self.set_level(0, false)
            }
            (_, Some(level)) => {
                if self.level == 0 && level > 0 {
                    self.ctx.report_cmd("DON");
                } else if self.level > 0 && level == 0 {
                    self.ctx.report_cmd("DOF");
                }
                self.set_level(level, false)
            }
            _ => Ok(()),
        }
    }

    fn query(&mut self) -> Result<(), DeviceError> {
        let query_topic = topics::sibling(&self.cmd_topic, "State");
        self.ctx.publish(&query_topic, "")?;
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
    fn power_and_level_updates() {
        let mut rig = rig("dimmer", json!({}));

        rig.handler
            .update(r#"{"POWER": "ON", "Dimmer": 40}"#, "stat/dev1/RESULT")
            .unwrap();
        assert_eq!(rig.driver("ST"), Some(40.0));

        rig.handler.update(r#"{"Dimmer": 0}"#, "stat/dev1/RESULT").unwrap();
        assert_eq!(rig.driver("ST"), Some(0.0));

        rig.handler.update(r#"{"POWER": "ON"}"#, "stat/dev1/RESULT").unwrap();
        assert_eq!(rig.driver("ST"), Some(100.0));
        assert_eq!(rig.reported(), ["DON", "DOF", "DON"]);
    }

    #[test]
    fn level_commands_clamp_and_publish() {
        let mut rig = rig("dimmer", json!({}));

        rig.handler.command(&NodeCommand::new("DON")).unwrap();
        rig.handler
            .command(&NodeCommand::new("DON").with_value("95"))
            .unwrap();
        rig.handler.command(&NodeCommand::new("BRT")).unwrap();
        rig.handler.command(&NodeCommand::new("DOF")).unwrap();
        rig.handler.command(&NodeCommand::new("DIM")).unwrap();

        let levels: Vec<_> = rig.published().into_iter().map(|(_, p)| p).collect();
        assert_eq!(levels, ["10", "95", "100", "0", "0"]);
    }

    #[test]
    fn query_uses_state_topic() {
        let mut rig = rig("dimmer", json!({}));
        rig.handler.query().unwrap();
        assert_eq!(
            rig.published(),
            [("cmnd/dev1/State".to_string(), String::new())]
        );
    }

    #[test]
    fn non_json_is_rejected() {
        let mut rig = rig("dimmer", json!({}));
        assert!(rig.handler.update("ON", "stat/dev1/POWER").is_err());
    }
}
