//! Controller Handle - lifecycle of the running bridge
//!
//! Spawns the tasks that make up a running bridge around one [`Controller`]
//! and keeps the cancellation token that stops them all.
//!

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::{Controller, DISCOVER, QUERY};
use crate::devices::DeviceTypeRegistry;
use crate::host::{HostEvent, HostPlatform, CONTROLLER_ADDRESS};
use crate::mqtt::mqtt_handler::{self, ConnectionEvent, MqttHandler, MqttStatus};

/// Handle for the running bridge
///
/// Owns the shared [`Controller`] and the cancellation token of every task
/// spawned for it.
///
/// # Task Model
///
/// Spawns three long-lived tokio tasks, plus two more once start-up succeeded:
/// 1. **Event Pump**: Consumes host events, acknowledges node creations and
///    forwards commands
/// 2. **Start-up**: Runs the first discovery, then opens the broker
///    connection and follows its connection events
/// 3. **MQTT Loop**: Polls the rumqttc event loop and feeds the router
/// 4. **Heartbeat**: Alternates `DON`/`DOF` on the controller node
///
/// Discoveries requested by the host are spawned off the pump so creation
/// acknowledgments keep flowing while a discovery waits on them.
pub struct ControllerHandle {
    controller: Arc<Controller>,
    cancel: CancellationToken,
    mqtt_status: watch::Receiver<MqttStatus>,
}

impl ControllerHandle {
    /// Spawns the complete bridge for `host`
    ///
    /// The handle returns immediately; start-up continues in the background
    /// and reports its progress through the controller node's `ST` driver and
    /// the host notices.
    ///
    /// # Arguments
    ///
    /// * `host` - Platform the device nodes live on
    /// * `events` - Receiving end of the host's event channel
    /// * `registry` - Device types known to discovery
    ///
    /// # Task Communication
    ///
    /// ```text
    /// Host ─[HostEvent]→ Event Pump ─→ Controller ←─[ConnectionEvent]─ MqttHandler
    ///                   (unbounded)                  (unbounded)
    /// ```
    pub fn spawn(
        host: Arc<dyn HostPlatform>,
        events: mpsc::UnboundedReceiver<HostEvent>,
        registry: Arc<DeviceTypeRegistry>,
    ) -> Self {
        info!("Initializing bridge with {} device types", registry.type_names().len());

        let controller = Arc::new(Controller::new(host, registry));
        let cancel = CancellationToken::new();
        let (status_tx, mqtt_status) = watch::channel(MqttStatus::default());

        info!("Starting host event pump");
        tokio::spawn(pump_host_events(controller.clone(), events, cancel.clone()));

        tokio::spawn(startup(controller.clone(), status_tx, cancel.clone()));

        Self {
            controller,
            cancel,
            mqtt_status,
        }
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.controller.clone()
    }

    pub fn mqtt_status(&self) -> watch::Receiver<MqttStatus> {
        self.mqtt_status.clone()
    }

    /// Stops the controller and cancels every task.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.controller.stop();
        self.cancel.cancel();
    }

    /// Resolves once the bridge stopped, by [`Self::shutdown`] or a host `Stop`.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }
}

/// Consumes host events until cancellation or channel close.
pub async fn pump_host_events(
    controller: Arc<Controller>,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    info!("Host event channel closed");
                    break;
                }
            },
        };

        match event {
            HostEvent::NodeAdded { address } => {
                debug!("Node {address} added");
                controller.acknowledge(&address);
            }
            HostEvent::Discover => spawn_discovery(&controller),
            HostEvent::Query => controller.query(),
            HostEvent::Command { address, command } if address == CONTROLLER_ADDRESS => {
                match command.cmd.as_str() {
                    DISCOVER => spawn_discovery(&controller),
                    QUERY => controller.query(),
                    other => warn!("Controller does not support {other}"),
                }
            }
            HostEvent::Command { address, command } => {
                if let Err(err) = controller.command(&address, &command) {
                    error!("Command {} for {address} failed: {err}", command.cmd);
                }
            }
            HostEvent::Stop => {
                controller.stop();
                cancel.cancel();
                break;
            }
        }
    }
}

fn spawn_discovery(controller: &Arc<Controller>) {
    let controller = controller.clone();
    tokio::spawn(async move {
        if let Err(err) = controller.discover().await {
            warn!("Discovery request failed: {err}");
        }
    });
}

async fn startup(
    controller: Arc<Controller>,
    status_tx: watch::Sender<MqttStatus>,
    cancel: CancellationToken,
) {
    if let Err(err) = controller.start().await {
        error!("Start-up failed: {err}");
        return;
    }

    let (params, settings) = controller.connection();
    let (client, eventloop) = mqtt_handler::client(&params);
    controller.gateway().attach(Arc::new(client));

    let (connection_tx, connection_rx) = mpsc::unbounded_channel();
    let handler = MqttHandler::new(
        eventloop,
        controller.router(),
        controller.host(),
        connection_tx,
        status_tx,
        &params,
        settings.mqtt_retry,
    );

    info!("Starting MQTT loop");
    tokio::spawn(handler.run(cancel.clone()));
    tokio::spawn(heartbeat(controller.clone(), settings.heartbeat, cancel.clone()));

    follow_connection(controller, connection_rx, cancel).await;
}

/// Applies connection events; the first connect completes start-up.
pub async fn follow_connection(
    controller: Arc<Controller>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    let mut started = false;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ConnectionEvent::Connected => {
                controller.on_connected();
                if !started {
                    controller.finish_startup();
                    started = true;
                }
            }
            ConnectionEvent::Lost => controller.on_lost(),
        }
    }
}

async fn heartbeat(controller: Arc<Controller>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => controller.heartbeat(),
        }
    }
}
