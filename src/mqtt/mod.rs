//! # MQTT side of the bridge
//!
//! Everything that touches the broker lives here: the outbound
//! [`CommandGateway`] every device handler publishes through, the inbound
//! [`MessageRouter`] that resolves a `(topic, payload)` pair to device nodes,
//! and the rumqttc connection handler that feeds the router.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── gateway.rs       - Transport seam and the publish helper
//! ├── memory.rs        - Recording transport for tests and dry runs
//! ├── message.rs       - Inbound message representation
//! ├── router.rs        - Topic and multi-sensor resolution
//! └── mqtt_handler.rs  - Event loop, reconnection and status reporting
//! ```
//!
//! ## Message Flow
//!
//! ```text
//!  broker ──► EventLoop ──► MqttHandler ──► MessageRouter ──► DeviceHandler::update
//!                                                              │
//!  broker ◄── AsyncClient ◄── CommandGateway ◄─────────────────┘ publish
//! ```
//!
//! ## Routing Rules
//!
//! - Messages are dropped while a discovery pass is running, the topic index
//!   is being rewritten at that point.
//! - Non-JSON payloads resolve purely by topic.
//! - JSON payloads are unwrapped from `StatusSNS` first. When they carry
//!   multi-sensor containers (`ANALOG` channels, `DS18B20*`, `AM2301*`,
//!   `BME280*` keys) each embedded sensor is matched against the devices'
//!   `sensor_id`, falling back to the topic owner. One message may reach
//!   several devices.
//! - Handler failures are logged and never stop the loop.

pub mod gateway;
pub mod memory;
pub mod message;
pub mod mqtt_handler;
pub mod router;

pub use gateway::{CommandGateway, Transport, TransportError};
pub use memory::MemoryTransport;
pub use message::MqttMessage;
pub use mqtt_handler::{ConnectionEvent, ConnectionState, MqttHandler, MqttStatus};
pub use router::{MessageRouter, RouteOutcome};
