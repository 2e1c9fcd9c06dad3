use tracing::{info, warn};

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const SENSOR_KEY: &str = "ENERGY";

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("CC", 0.0, 1, "Current"),
    DriverDef::new("CPW", 0.0, 73, "Power"),
    DriverDef::new("CV", 0.0, 72, "Voltage"),
    DriverDef::new("PF", 0.0, 53, "Power Factor"),
    DriverDef::new("TPW", 0.0, 33, "Total Power"),
];

/// Sonoff S31 style energy monitoring plug.
pub struct EnergyType;

impl DeviceType for EnergyType {
    fn type_name(&self) -> &'static str {
        "s31"
    }

    fn node_def(&self) -> &'static str {
        "mqs31"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, _spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(EnergyMeter { ctx })
    }
}

pub struct EnergyMeter {
    ctx: NodeContext,
}

impl EnergyMeter {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for EnergyMeter {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = parse_object(payload)?;
        let Some(energy) = data.get(SENSOR_KEY).and_then(|v| v.as_object()) else {
            warn!("{} no {SENSOR_KEY} block", self.ctx.label());
            self.ctx.set_driver("ST", 0.0);
            return Ok(());
        };

        self.ctx.set_driver("ST", 1.0);
        for (key, driver) in [
            ("Current", "CC"),
            ("Power", "CPW"),
            ("Voltage", "CV"),
            ("Factor", "PF"),
            ("Total", "TPW"),
        ] {
            self.ctx.set_driver_opt(driver, field(energy, key));
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
    fn energy_block_maps_to_drivers() {
        let mut rig = rig("s31", json!({}));
        rig.handler
            .update(
                r#"{"ENERGY": {"Total": 12.3, "Power": 60, "Factor": 0.91, "Voltage": 120, "Current": 0.5}}"#,
                "tele/dev1/SENSOR",
            )
            .unwrap();

        assert_eq!(rig.driver("ST"), Some(1.0));
        assert_eq!(rig.driver("CC"), Some(0.5));
        assert_eq!(rig.driver("PF"), Some(0.91));
        assert_eq!(rig.driver("TPW"), Some(12.3));
    }
}
