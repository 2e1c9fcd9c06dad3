use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::MqttMessage;
use super::router::MessageRouter;
use crate::config::ConnectionParams;
use crate::host::HostPlatform;

/// Notice key used while the broker is unreachable.
pub const MQTT_NOTICE: &str = "mqtt";

const KEEP_ALIVE: Duration = Duration::from_secs(10);
const REQUEST_CAPACITY: usize = 100;
const MAX_ERRORS: usize = 20;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Connection lifecycle changes the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Lost,
}

/// Builds the client and its event loop. Nothing touches the network until
/// the loop is polled.
pub fn client(params: &ConnectionParams) -> (AsyncClient, EventLoop) {
    let client_id = format!("mqtt-poly-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, params.server.clone(), params.port);
    options
        .set_credentials(params.user.clone(), params.password.clone())
        .set_keep_alive(KEEP_ALIVE);
    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Drives the rumqttc event loop: routes inbound publishes, reports
/// connection changes and retries on a fixed interval while the broker is
/// unreachable.
pub struct MqttHandler {
    eventloop: EventLoop,
    router: MessageRouter,
    host: Arc<dyn HostPlatform>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    status: MqttStatus,
    status_tx: watch::Sender<MqttStatus>,
    retry: Duration,
    broker: String,
}

impl MqttHandler {
    pub fn new(
        eventloop: EventLoop,
        router: MessageRouter,
        host: Arc<dyn HostPlatform>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        status_tx: watch::Sender<MqttStatus>,
        params: &ConnectionParams,
        retry: Duration,
    ) -> Self {
        let handler = Self {
            eventloop,
            router,
            host,
            events,
            status: MqttStatus {
                connection_state: ConnectionState::Connecting,
                ..Default::default()
            },
            status_tx,
            retry,
            broker: format!("{}:{}", params.server, params.port),
        };
        handler.publish_status();
        handler
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Connecting to MQTT broker {}", self.broker);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.eventloop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(err) => {
                        self.handle_error(err);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.retry) => {}
                        }
                    }
                },
            }
        }
        self.status.connection_state = ConnectionState::Disconnected;
        self.publish_status();
        info!("MQTT loop for {} stopped", self.broker);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("MQTT connected to {}", self.broker);
                    self.status.connection_state = ConnectionState::Connected;
                    self.host.remove_notice(MQTT_NOTICE);
                    self.notify(ConnectionEvent::Connected);
                } else {
                    self.record_error(format!("connection refused: {:?}", ack.code));
                    self.status.connection_state = ConnectionState::Failed;
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = MqttMessage::from_publish(&publish.topic, &publish.payload);
                debug!("Received {message}");
                self.status.messages_received += 1;
                self.status.last_activity = Some(message.timestamp);
                self.router.route(&message.topic, &message.content);
            }
            Event::Incoming(Packet::Disconnect) => {
                info!("Broker closed the MQTT session");
                self.lost(ConnectionState::Reconnecting);
            }
            Event::Outgoing(Outgoing::Publish(_)) => {
                self.status.messages_sent += 1;
                self.status.last_activity = Some(Local::now());
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                info!("MQTT graceful disconnection");
                self.lost(ConnectionState::Disconnected);
            }
            other => {
                debug!("MQTT event {other:?}");
                return;
            }
        }
        self.publish_status();
    }

    fn handle_error(&mut self, err: ConnectionError) {
        warn!("MQTT connection to {} failed: {err}, retrying in {:?}", self.broker, self.retry);
        self.record_error(err.to_string());
        self.host
            .set_notice(MQTT_NOTICE, "Waiting on user MQTT connection");

        let next = match self.status.connection_state {
            ConnectionState::Connected | ConnectionState::Reconnecting => ConnectionState::Reconnecting,
            _ => ConnectionState::Failed,
        };
        self.lost(next);
        self.publish_status();
    }

    fn lost(&mut self, next: ConnectionState) {
        if self.status.connection_state == ConnectionState::Connected {
            self.notify(ConnectionEvent::Lost);
        }
        self.status.connection_state = next;
    }

    fn record_error(&mut self, message: String) {
        self.status.error_messages.push(message);
        let excess = self.status.error_messages.len().saturating_sub(MAX_ERRORS);
        self.status.error_messages.drain(..excess);
    }

    fn notify(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!("Nobody listens for connection events");
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}
