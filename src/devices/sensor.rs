use serde_json::{json, Map, Value};
use tracing::info;

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Motion"),
    DriverDef::new("CLITEMP", 0.0, 17, "Temperature"),
    DriverDef::new("GPV", 0.0, 17, "Heat Index"),
    DriverDef::new("CLIHUM", 0.0, 22, "Humidity"),
    DriverDef::new("LUMIN", 0.0, 36, "Luminance"),
    DriverDef::new("GV0", 0.0, 78, "LED"),
    DriverDef::new("GV1", 0.0, 100, "Brightness"),
    DriverDef::new("GV2", 0.0, 100, "Red"),
    DriverDef::new("GV3", 0.0, 100, "Green"),
    DriverDef::new("GV4", 0.0, 100, "Blue"),
];

const COLOR_MAX: i64 = 255;

pub struct SensorType;

impl DeviceType for SensorType {
    fn type_name(&self) -> &'static str {
        "sensor"
    }

    fn node_def(&self) -> &'static str {
        "mqsens"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Sensor {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            motion: false,
        })
    }
}

/// Multi sensor board: motion, climate, light level and an RGB status LED.
pub struct Sensor {
    ctx: NodeContext,
    cmd_topic: String,
    motion: bool,
}

impl Sensor {
    const COMMANDS: CommandTable<Self> = &[
        ("QUERY", Self::cmd_query),
        ("DON", Self::cmd_led_on),
        ("DOF", Self::cmd_led_off),
        ("SETLED", Self::cmd_set_led),
    ];

    fn update_motion(&mut self, data: &Map<String, Value>) {
        match data.get("motion") {
            Some(motion) if motion.as_str() == Some("standby") => {
                self.ctx.set_driver("ST", 0.0);
                if self.motion {
                    self.motion = false;
                    self.ctx.report_cmd("DOF");
                }
            }
            Some(_) => {
                self.ctx.set_driver("ST", 1.0);
                if !self.motion {
                    self.motion = true;
                    self.ctx.report_cmd("DON");
                }
            }
            None => self.ctx.set_driver("ST", 0.0),
        }
    }

    fn update_environment(&self, data: &Map<String, Value>) {
        for (key, driver) in [
            ("temperature", "CLITEMP"),
            ("heatIndex", "GPV"),
            ("humidity", "CLIHUM"),
            ("ldr", "LUMIN"),
        ] {
            if data.contains_key(key) {
                self.ctx.set_driver_opt(driver, field(data, key));
            }
        }
    }

    fn update_led(&self, data: &Map<String, Value>) {
        if let Some(state) = data.get("state") {
            let on = state.as_str() == Some("ON");
            self.ctx.set_driver("GV0", if on { 100.0 } else { 0.0 });
        }
        if data.contains_key("brightness") {
            self.ctx.set_driver_opt("GV1", field(data, "brightness"));
        }
        if let Some(Value::Object(color)) = data.get("color") {
            for (key, driver) in [("r", "GV2"), ("g", "GV3"), ("b", "GV4")] {
                if color.contains_key(key) {
                    self.ctx.set_driver_opt(driver, field(color, key));
                }
            }
        }
    }

    fn cmd_led_on(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, json!({"state": "ON"}).to_string())
    }

    fn cmd_led_off(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.ctx.publish(&self.cmd_topic, json!({"state": "OFF"}).to_string())
    }

    fn cmd_set_led(&mut self, command: &NodeCommand) -> Result<(), DeviceError> {
        let limit = |key: &str| command.param_int(key).map(|v| v.clamp(0, COLOR_MAX));
        let (red, green, blue) = (limit("R.uom100")?, limit("G.uom100")?, limit("B.uom100")?);
        let brightness = limit("I.uom100")?;
        let mut led = json!({
            "state": "ON",
            "brightness": brightness,
            "color": {"r": red, "g": green, "b": blue},
        });
        let transition = command.param_int("D.uom58")?;
        let flash = command.param_int("F.uom58")?;
        if transition > 0 {
            led["transition"] = json!(transition);
        }
        if flash > 0 {
            led["flash"] = json!(flash);
        }
        self.ctx.publish(&self.cmd_topic, led.to_string())
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Sensor {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;
        self.update_motion(&data);
        self.update_environment(&data);
        self.update_led(&data);
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
    fn motion_and_environment() {
        let mut rig = rig("sensor", json!({}));

        rig.handler
            .update(
                r#"{"motion": "motion detected", "temperature": 71.2, "humidity": 40, "ldr": 512,
                    "state": "ON", "brightness": 200, "color": {"r": 255, "g": 10}}"#,
                "home/sensor1",
            )
            .unwrap();
        rig.handler.update(r#"{"motion": "standby"}"#, "home/sensor1").unwrap();

        assert_eq!(rig.reported(), ["DON", "DOF"]);
        assert_eq!(rig.driver("ST"), Some(0.0));
        assert_eq!(rig.driver("CLITEMP"), Some(71.2));
        assert_eq!(rig.driver("LUMIN"), Some(512.0));
        assert_eq!(rig.driver("GV0"), Some(100.0));
        assert_eq!(rig.driver("GV2"), Some(255.0));
        assert_eq!(rig.driver("GV4"), Some(0.0));
    }

    #[test]
    fn set_led_clamps_channels() {
        let mut rig = rig("sensor", json!({}));
        let command = NodeCommand::new("SETLED")
            .with_param("R.uom100", "300")
            .with_param("G.uom100", "-4")
            .with_param("B.uom100", "20")
            .with_param("I.uom100", "128")
            .with_param("F.uom58", "2");

        rig.handler.command(&command).unwrap();

        let (_, payload) = rig.published().pop().unwrap();
        let sent: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(sent["color"], json!({"r": 255, "g": 0, "b": 20}));
        assert_eq!(sent["brightness"], 128);
        assert_eq!(sent["flash"], 2);
        assert!(sent.get("transition").is_none());
    }
}
