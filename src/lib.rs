//! Bridge between an MQTT broker and the device nodes of a host automation
//! platform.
//!
//! ```text
//!   params ──► config::resolve ──► DeviceDirectory ──► discovery::Reconciler ──► host nodes
//!                                                            │
//!                                                            ▼
//!   broker ──► mqtt::MqttHandler ──► mqtt::MessageRouter ◄── topics::TopicIndex
//!                                          │
//!                                          ▼
//!                              devices::DeviceHandler ──► mqtt::CommandGateway ──► broker
//! ```

pub mod config;
pub mod controller;
pub mod devices;
pub mod discovery;
pub mod host;
pub mod mqtt;
pub mod state;
pub mod topics;
