//! Controller subsystem: the bridge's own node
//!
//! 1. [`controller`] - Start-up, discovery, queries, subscriptions and heartbeat
//! 2. [`controller_handle`] - Task spawning and lifecycle
//!
//! # Architecture
//!
//! ```text
//!              HostEvent                        ConnectionEvent
//! Host ──────► Event Pump ──► Controller ◄──── MqttHandler
//!                               │   │
//!                    Reconciler ◄┘   └► CommandGateway ──► broker
//! ```

pub mod controller;
pub mod controller_handle;

pub use controller::{Controller, ControllerError};
pub use controller_handle::ControllerHandle;
