use serde_json::{json, Value};
use tracing::info;

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const LED_ON: f64 = 100.0;
const LED_OFF: f64 = 0.0;
const COLOR_MAX: i64 = 255;

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("GV0", 0.0, 78, "State"),
    DriverDef::new("GV1", 0.0, 100, "Brightness"),
    DriverDef::new("GV2", 0.0, 100, "Red"),
    DriverDef::new("GV3", 0.0, 100, "Green"),
    DriverDef::new("GV4", 0.0, 100, "Blue"),
    DriverDef::new("GV5", 0.0, 100, "White"),
    DriverDef::new("GV6", 0.0, 100, "Program"),
];

pub struct RgbwType;

impl DeviceType for RgbwType {
    fn type_name(&self) -> &'static str {
        "RGBW"
    }

    fn node_def(&self) -> &'static str {
        "mqrgbw"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(RgbwStrip {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
        })
    }
}

pub struct RgbwStrip {
    ctx: NodeContext,
    cmd_topic: String,
}

impl RgbwStrip {
    const COMMANDS: CommandTable<Self> = &[
        ("QUERY", Self::cmd_query),
        ("DON", Self::cmd_on),
        ("DOF", Self::cmd_off),
        ("SETRGBW", Self::cmd_set_rgbw),
    ];

    fn cmd_on(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, json!({"state": "ON"}).to_string())
    }

    fn cmd_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, json!({"state": "OFF"}).to_string())
    }

    fn cmd_set_rgbw(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
        let limit = |key: &str| command.param_int(key).map(|v| v.clamp(0, COLOR_MAX));
        let (red, green, blue, white) = (
            limit("STRIPR.uom100")?,
            limit("STRIPG.uom100")?,
            limit("STRIPB.uom100")?,
            limit("STRIPW.uom100")?,
        );
        let (brightness, program) = (limit("STRIPI.uom100")?, limit("STRIPP.uom100")?);
        let strip = json!({
            "state": "ON",
            "br": brightness,
            "c": {"r": red, "g": green, "b": blue, "w": white},
            "pgm": program,
        });
        self.ctx.publish(&self.cmd_topic, strip.to_string())
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for RgbwStrip {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;

        if let Some(state) = data.get("state") {
            if state.as_str() == Some("ON") {
                self.ctx.set_driver("GV0", LED_ON);
                self.ctx.report_cmd("DON");
            } else {
                self.ctx.set_driver("GV0", LED_OFF);
                self.ctx.report_cmd("DOF");
            }
        }
        if data.contains_key("br") {
            self.ctx.set_driver_opt("GV1", field(&data, "br"));
        }
        if let Some(Value::Object(color)) = data.get("c") {
            for (key, driver) in [("r", "GV2"), ("g", "GV3"), ("b", "GV4"), ("w", "GV5")] {
                self.ctx.set_driver_opt(driver, field(color, key));
            }
        }
        if data.contains_key("pgm") {
            self.ctx.set_driver_opt("GV6", field(&data, "pgm"));
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
    fn strip_state_maps_to_drivers() {
        let mut rig = rig("RGBW", json!({}));

        rig.handler
            .update(
                r#"{"state": "ON", "br": 80, "c": {"r": 1, "g": 2, "b": 3, "w": 4}, "pgm": 5}"#,
                "stat/strip",
            )
            .unwrap();

        assert_eq!(rig.driver("GV0"), Some(LED_ON));
        assert_eq!(rig.driver("GV5"), Some(4.0));
        assert_eq!(rig.driver("GV6"), Some(5.0));
        assert_eq!(rig.reported(), ["DON"]);
    }

    #[test]
    fn set_rgbw_builds_strip_command() {
        let mut rig = rig("RGBW", json!({}));
        let command = NodeCommand::new("SETRGBW")
            .with_param("STRIPR.uom100", "999")
            .with_param("STRIPW.uom100", "7");

        rig.handler.command(&command).unwrap();

        let (_, payload) = rig.published().pop().unwrap();
        let sent: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(sent["c"], json!({"r": 255, "g": 0, "b": 0, "w": 7}));
        assert_eq!(sent["br"], 0);
        assert_eq!(sent["state"], "ON");
    }
}
