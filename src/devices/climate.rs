use serde_json::{Map, Value};
use tracing::{info, warn};

use super::payload::{field, parse_object, unwrap_status};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};
use crate::topics;

const DEFAULT_SENSOR_ID: &str = "SINGLE_SENSOR";
const DS18B20: &str = "DS18B20";
const HPA_TO_INHG: f64 = 0.029_529_987_51;

const DHT_DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "AM2301 ST"),
    DriverDef::new("CLITEMP", 0.0, 17, "Temperature"),
    DriverDef::new("CLIHUM", 0.0, 22, "Humidity"),
    DriverDef::new("DEWPT", 0.0, 17, "Dew Point"),
];

const DS_DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "DS18B20 ST"),
    DriverDef::new("CLITEMP", 0.0, 17, "Temperature"),
];

const BME_DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 0.0, 2, "Status"),
    DriverDef::new("CLITEMP", 0.0, 17, "Temperature"),
    DriverDef::new("CLIHUM", 0.0, 22, "Humidity"),
    DriverDef::new("DEWPT", 0.0, 17, "Dew Point"),
    DriverDef::new("BARPRES", 0.0, 23, "Barometric Pressure"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// AM2301 style temperature + humidity.
    TempHumid,
    /// DS18B20 temperature only.
    Temp,
    /// BME280 temperature, humidity and pressure.
    TempHumidPress,
}

/// Tasmota climate sensors, one descriptor per probe family.
pub struct ClimateType {
    type_name: &'static str,
    node_def: &'static str,
    drivers: &'static [DriverDef],
    probe: Probe,
}

impl ClimateType {
    pub const TEMP_HUMID: Self = Self {
        type_name: "TempHumid",
        node_def: "mqdht",
        drivers: DHT_DRIVERS,
        probe: Probe::TempHumid,
    };
    pub const TEMP: Self = Self {
        type_name: "Temp",
        node_def: "mqds",
        drivers: DS_DRIVERS,
        probe: Probe::Temp,
    };
    pub const TEMP_HUMID_PRESS: Self = Self {
        type_name: "TempHumidPress",
        node_def: "mqbme",
        drivers: BME_DRIVERS,
        probe: Probe::TempHumidPress,
    };
}

impl DeviceType for ClimateType {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn node_def(&self) -> &'static str {
        self.node_def
    }

    fn drivers(&self) -> &'static [DriverDef] {
        self.drivers
    }

    fn new_handler(&self, ctx: NodeContext, spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Climate {
            ctx,
            cmd_topic: spec.cmd_topic.clone(),
            sensor_id: spec
                .sensor_id
                .clone()
                .unwrap_or_else(|| DEFAULT_SENSOR_ID.to_string()),
            probe: self.probe,
        })
    }

    /// Replies to the `Status 10` poll arrive on the stat side.
    fn extra_topics(&self, primary: &str) -> Vec<String> {
        vec![topics::stat_path(&topics::sibling(primary, "STATUS10"))]
    }
}

pub struct Climate {
    ctx: NodeContext,
    cmd_topic: String,
    sensor_id: String,
    probe: Probe,
}

impl Climate {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn reading<'a>(&self, data: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        let reading = match self.probe {
            Probe::Temp => data.get(&self.sensor_id).or_else(|| data.get(DS18B20)),
            Probe::TempHumid | Probe::TempHumidPress => data.get(&self.sensor_id),
        };
        reading.and_then(Value::as_object)
    }

    fn apply(&self, reading: &Map<String, Value>) {
        if self.probe == Probe::Temp {
            match field(reading, "Temperature") {
                Some(temp) => {
                    self.ctx.set_driver("ST", 1.0);
                    self.ctx.set_driver("CLITEMP", temp);
                }
                None => {
                    warn!("{} reading without Temperature", self.ctx.label());
                    self.ctx.set_driver("ST", 0.0);
                }
            }
            return;
        }

        self.ctx.set_driver("ST", 1.0);
        self.ctx.set_driver_opt("CLITEMP", field(reading, "Temperature"));
        self.ctx.set_driver_opt("CLIHUM", field(reading, "Humidity"));
        self.ctx.set_driver_opt("DEWPT", field(reading, "DewPoint"));
        if self.probe == Probe::TempHumidPress {
            let inhg = field(reading, "Pressure").map(|hpa| (hpa * HPA_TO_INHG * 100.0).round() / 100.0);
            self.ctx.set_driver_opt("BARPRES", inhg);
        }
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Climate {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        let data = unwrap_status(parse_object(payload)?);
        match self.reading(&data) {
            Some(reading) => self.apply(reading),
            None => {
                warn!("{} no reading for {}", self.ctx.label(), self.sensor_id);
                self.ctx.set_driver("ST", 0.0);
            }
        }
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
    fn dht_reads_named_sensor_inside_status_envelope() {
        let mut rig = rig("TempHumid", json!({"sensor_id": "AM2301-1"}));

        rig.handler
            .update(
                r#"{"StatusSNS": {"AM2301-1": {"Temperature": 70.5, "Humidity": 41.0, "DewPoint": 45.2}}}"#,
                "stat/dev1/STATUS10",
            )
            .unwrap();

        assert_eq!(rig.driver("ST"), Some(1.0));
        assert_eq!(rig.driver("CLIHUM"), Some(41.0));
        assert_eq!(rig.driver("DEWPT"), Some(45.2));
    }

    #[test]
    fn dht_without_reading_goes_offline() {
        let mut rig = rig("TempHumid", json!({}));
        rig.handler
            .update(r#"{"AM2301": {"Temperature": 70}}"#, "tele/dev1/SENSOR")
            .unwrap();
        assert_eq!(rig.driver("ST"), Some(0.0));
    }

    #[test]
    fn ds_falls_back_to_family_key() {
        let mut rig = rig("Temp", json!({}));
        rig.handler
            .update(r#"{"DS18B20": {"Temperature": 66.1}}"#, "tele/dev1/SENSOR")
            .unwrap();
        assert_eq!(rig.driver("CLITEMP"), Some(66.1));
        assert_eq!(rig.driver("ST"), Some(1.0));
    }

    #[test]
    fn bme_converts_pressure_to_inhg() {
        let mut rig = rig("TempHumidPress", json!({"sensor_id": "BME280"}));
        rig.handler
            .update(
                r#"{"BME280": {"Temperature": 68, "Humidity": 30, "DewPoint": 36, "Pressure": 1013.25}}"#,
                "tele/dev1/SENSOR",
            )
            .unwrap();
        assert_eq!(rig.driver("BARPRES"), Some(29.92));
    }

    #[test]
    fn query_polls_status_10() {
        let mut rig = rig("Temp", json!({}));
        rig.handler.query().unwrap();
        assert_eq!(
            rig.published(),
            [("cmnd/dev1/Status".to_string(), "10".to_string())]
        );
    }
}
