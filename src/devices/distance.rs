use tracing::{info, warn};

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const SENSOR_KEY: &str = "SR04";

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("DISTANC", 0.0, 5, "Distance"),
];

pub struct DistanceType;

impl DeviceType for DistanceType {
    fn type_name(&self) -> &'static str {
        "distance"
    }

    fn node_def(&self) -> &'static str {
        "mqhcsr"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, _spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Distance { ctx })
    }
}

/// HC-SR04 ultrasonic range finder.
pub struct Distance {
    ctx: NodeContext,
}

impl Distance {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Distance {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;
        let distance = data
            .get(SENSOR_KEY)
            .and_then(|reading| reading.as_object())
            .and_then(|reading| field(reading, "Distance"));

        match distance {
            Some(distance) => {
                self.ctx.set_driver("ST", 1.0);
                self.ctx.set_driver("DISTANC", distance);
            }
            None => {
                warn!("{} no {SENSOR_KEY} distance in payload", self.ctx.label());
                self.ctx.set_driver("ST", 0.0);
                self.ctx.set_driver("DISTANC", 0.0);
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
    fn reads_sr04_distance() {
        let mut rig = rig("distance", json!({}));

        rig.handler
            .update(r#"{"SR04": {"Distance": 12.5}}"#, "tele/dev1/SENSOR")
            .unwrap();
        assert_eq!(rig.driver("DISTANC"), Some(12.5));

        rig.handler.update(r#"{"Other": 1}"#, "tele/dev1/SENSOR").unwrap();
        assert_eq!(rig.driver("DISTANC"), Some(0.0));
        assert_eq!(rig.driver("ST"), Some(0.0));
    }
}
