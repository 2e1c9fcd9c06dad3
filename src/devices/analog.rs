use serde_json::Value;
use tracing::{debug, info};

use super::payload::{invalid, number, parse_object, unwrap_status};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};
use crate::topics;

pub const ANALOG_KEY: &str = "ANALOG";

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Analog ST"),
    DriverDef::new("GPV", 0.0, 56, "Analog"),
];

pub struct AnalogType;

impl DeviceType for AnalogType {
    fn type_name(&self) -> &'static str {
        "analog"
    }

    fn node_def(&self) -> &'static str {
        "mqanal"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Analog {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            sensor_id: spec.sensor_id.clone(),
        })
    }

    fn extra_topics(&self, primary: &str) -> Vec<String> {
        vec![topics::stat_path(&topics::sibling(primary, "STATUS10"))]
    }
}

/// Analog input channel. Without a `sensor_id` the first channel is used.
pub struct Analog {
    ctx: NodeContext,
    cmd_topic: String,
    sensor_id: Option<String>,
}

impl Analog {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Analog {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = unwrap_status(parse_object(payload)?);
        let Some(Value::Object(channels)) = data.get(ANALOG_KEY) else {
            debug!("{} no {ANALOG_KEY} block", self.ctx.label());
            self.ctx.set_driver("ST", 0.0);
            self.ctx.set_driver("GPV", 0.0);
            return Ok(());
        };

        self.ctx.set_driver("ST", 1.0);
        let value = match &self.sensor_id {
            Some(sensor_id) => channels
                .get(sensor_id)
                .ok_or_else(|| invalid(payload, &format!("channel {sensor_id} missing")))?,
            None => channels
                .values()
                .next()
                .ok_or_else(|| invalid(payload, "empty ANALOG block"))?,
        };
        self.ctx.set_driver_opt("GPV", number(value));
        Ok(())
    }

    fn query(&mut self) -> Result<(), DeviceError> {
        self.ctx
            .publish(&topics::sibling(&self.cmd_topic, "Status"), "10")?;
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
    fn named_channel() {
        let mut rig = rig("analog", json!({"sensor_id": "A1"}));
        rig.handler
            .update(r#"{"ANALOG": {"A0": 10, "A1": 42}}"#, "tele/dev1/SENSOR")
            .unwrap();
        assert_eq!(rig.driver("GPV"), Some(42.0));
        assert!(rig
            .handler
            .update(r#"{"ANALOG": {"A0": 10}}"#, "tele/dev1/SENSOR")
            .is_err());
    }

    #[test]
    fn first_channel_without_sensor_id() {
        let mut rig = rig("analog", json!({}));
        rig.handler
            .update(r#"{"StatusSNS": {"ANALOG": {"A0": 512}}}"#, "stat/dev1/STATUS10")
            .unwrap();
        assert_eq!(rig.driver("GPV"), Some(512.0));
        assert_eq!(rig.driver("ST"), Some(1.0));
    }
}
