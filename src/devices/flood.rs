use tracing::{info, warn};

use super::payload::invalid;
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

/// Last topic segment → driver.
const TOPIC_MAP: &[(&str, &str)] = &[
    ("temperature", "CLITEMP"),
    ("flood", "GV0"),
    ("battery", "BATLVL"),
    ("error", "GPV"),
];

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("CLITEMP", 0.0, 17, "Temperature"),
    DriverDef::new("GV0", 0.0, 2, "Flood"),
    DriverDef::new("BATLVL", 0.0, 51, "Battery Level"),
    DriverDef::new("GPV", 0.0, 56, "Error"),
];

/// Shelly flood sensor; publishes each reading on its own topic, so the
/// configured `status_topic` list is used verbatim.
pub struct FloodType;

impl DeviceType for FloodType {
    fn type_name(&self) -> &'static str {
        "shellyflood"
    }

    fn node_def(&self) -> &'static str {
        "mqshflood"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, _spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Flood { ctx })
    }
}

pub struct Flood {
    ctx: NodeContext,
}

impl Flood {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Flood {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let suffix = topic.rsplit('/').next().unwrap_or(topic);
        let Some((_, driver)) = TOPIC_MAP.iter().find(|(leaf, _)| *leaf == suffix) else {
            warn!("{} no driver for topic suffix {suffix}", self.ctx.label());
            return Ok(());
        };

        let value = if *driver == "GV0" {
            if payload.trim().eq_ignore_ascii_case("true") {
                1.0
            } else {
                0.0
            }
        } else {
            payload
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(payload, "expected a number"))?
        };
        self.ctx.set_driver(driver, value);
        self.ctx.set_driver("ST", 1.0);
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
    fn topic_suffix_selects_driver() {
        let mut rig = rig("shellyflood", json!({}));

        rig.handler.update("true", "shellies/f/sensor/flood").unwrap();
        rig.handler.update("87", "shellies/f/sensor/battery").unwrap();
        rig.handler.update("ignored", "shellies/f/sensor/lux").unwrap();

        assert_eq!(rig.driver("GV0"), Some(1.0));
        assert_eq!(rig.driver("BATLVL"), Some(87.0));
        assert_eq!(rig.driver("ST"), Some(1.0));
        assert!(rig.handler.update("hot", "shellies/f/sensor/temperature").is_err());
    }
}
