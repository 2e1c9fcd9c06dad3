use tracing::{info, warn};

use super::payload::{field, parse_object};
use super::{
    dispatch, CommandTable, DeviceError, DeviceHandler, DeviceSpec, DeviceType, DriverDef,
    NodeCommand, NodeContext,
};

const SERVER_STATES: &[(&str, f64)] = &[("Connected", 0.0), ("Connecting", 1.0), ("Disconnected", 2.0)];
const SERVER_DISCONNECTED: f64 = 2.0;

const SIGNAL_STATES: &[(&str, f64)] = &[
    ("Initializing", 0.0),
    ("No Signal", 1.0),
    ("Weak Signal", 2.0),
    ("Strong Signal", 3.0),
];
const SIGNAL_NONE: f64 = 1.0;

const DRIVERS: &[DriverDef] = &[
    DriverDef::new("ST", 2.0, 25, "Server Status"),
    DriverDef::new("GV0", 1.0, 25, "Signal Quality"),
    DriverDef::new("GV1", 0.0, 2, "Health Status"),
    DriverDef::new("WVOL", 0.0, 35, "Volume"),
    DriverDef::new("WATERF", 0.0, 130, "Flow Rate"),
];

/// Droplet water flow monitor.
pub struct DropletType;

impl DeviceType for DropletType {
    fn type_name(&self) -> &'static str {
        "droplet"
    }

    fn node_def(&self) -> &'static str {
        "mqdroplet"
    }

    fn drivers(&self) -> &'static [DriverDef] {
        DRIVERS
    }

    fn new_handler(&self, ctx: NodeContext, _spec: &DeviceSpec) -> Box<dyn DeviceHandler> {
        Box::new(Droplet { ctx })
    }

    fn status_topics(&self, primary: &[String]) -> Vec<String> {
        primary
            .iter()
            .flat_map(|base| [format!("{base}/state"), format!("{base}/health")])
            .collect()
    }
}

pub struct Droplet {
    ctx: NodeContext,
}

fn lookup(table: &[(&str, f64)], key: &str, fallback: f64) -> f64 {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map_or(fallback, |(_, value)| *value)
}

impl Droplet {
    const COMMANDS: CommandTable<Self> = &[("QUERY", Self::cmd_query)];

    fn update_health(&self, payload: &str) {
        let online = payload.trim().eq_ignore_ascii_case("online");
        self.ctx.set_driver("GV1", if online { 1.0 } else { 0.0 });
    }

    fn update_state(&self, payload: &str) -> Result<(), DeviceError> {
        let data = parse_object(payload)?;
        let text = |key: &str| data.get(key).and_then(|v| v.as_str()).unwrap_or_default();

        let server = lookup(SERVER_STATES, text("server"), SERVER_DISCONNECTED);
        self.ctx.set_driver("ST", server);
        self.ctx
            .set_driver("GV0", lookup(SIGNAL_STATES, text("signal"), SIGNAL_NONE));
        self.ctx
            .report_cmd(if server == 0.0 { "DON" } else { "DOF" });

        // volume arrives in ml, flow in l/min
        self.ctx
            .set_driver("WVOL", field(&data, "volume").unwrap_or_default() / 1000.0);
        self.ctx
            .set_driver("WATERF", field(&data, "flow").unwrap_or_default() * 60.0);
        Ok(())
    }

    fn cmd_query(&mut self, _: &NodeCommand) -> Result<(), DeviceError> {
        self.query()
    }
}

impl DeviceHandler for Droplet {
    fn update(&mut self, payload: &str, topic: &str) -> Result<(), DeviceError> {
        info!("{} topic:{topic}, payload:{payload}", self.ctx.label());
        if topic.ends_with("/health") {
            self.update_health(payload);
            return Ok(());
        }
        if !topic.ends_with("/state") {
            warn!("{} topic without /state or /health, assuming state", self.ctx.label());
        }
        self.update_state(payload)
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
    fn state_and_health() {
        let mut rig = rig("droplet", json!({}));

        rig.handler
            .update(
                r#"{"server": "Connected", "signal": "Strong Signal", "volume": 1500, "flow": 0.5}"#,
                "droplet-ABCD/state",
            )
            .unwrap();
        rig.handler.update("online", "droplet-ABCD/health").unwrap();
        rig.handler
            .update(r#"{"server": "Lost"}"#, "droplet-ABCD/state")
            .unwrap();

        assert_eq!(rig.driver("ST"), Some(2.0));
        assert_eq!(rig.driver("GV0"), Some(1.0));
        assert_eq!(rig.driver("GV1"), Some(1.0));
        assert_eq!(rig.driver("WVOL"), Some(0.0));
        assert_eq!(rig.reported(), ["DON", "DOF"]);
    }
}
