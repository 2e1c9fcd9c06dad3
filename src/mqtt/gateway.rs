use std::sync::Arc;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS, SubscribeFilter};
use thiserror::Error;
use tracing::debug;

use crate::topics;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("no MQTT connection established yet")]
    NotConnected,

    #[error("MQTT request queue is full")]
    QueueFull,
}

/// Outbound side of the broker connection.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
    /// Subscribes every topic of `topics` in one request.
    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
    fn disconnect(&self) -> Result<(), TransportError>;
}

impl Transport for AsyncClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        Ok(self.try_publish(topic, QoS::AtMostOnce, false, payload)?)
    }

    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        Ok(self.try_subscribe_many(filters)?)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        Ok(self.try_unsubscribe(topic)?)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(self.try_disconnect()?)
    }
}

/// Publish helper shared by every device handler.
///
/// Topics are normalized with the command prefix before they go out; the
/// message is sent once, unretained, and transport failures are returned to
/// the caller as-is. The transport can be attached after the handlers exist,
/// which is the normal case: nodes are created before the broker connection.
#[derive(Clone, Default)]
pub struct CommandGateway {
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    cmd_prefix: Arc<RwLock<Option<String>>>,
}

impl CommandGateway {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let gateway = Self::detached();
        gateway.attach(transport);
        gateway
    }

    /// Gateway without a transport; publishes fail with [`TransportError::NotConnected`].
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    pub fn set_cmd_prefix(&self, prefix: Option<String>) {
        *self.cmd_prefix.write() = prefix;
    }

    pub fn publish(&self, topic: &str, message: impl Into<String>) -> Result<(), TransportError> {
        let topic = topics::normalize(Some(topic), self.cmd_prefix.read().as_deref());
        let message = message.into();
        let transport = self.transport().ok_or(TransportError::NotConnected)?;

        debug!("Publishing {message:?} to {topic}");
        transport.publish(&topic, message.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::MemoryTransport;

    #[test]
    fn publish_applies_command_prefix() {
        let transport = Arc::new(MemoryTransport::new());
        let gateway = CommandGateway::new(transport.clone());
        gateway.set_cmd_prefix(Some("cmnd/".to_string()));

        gateway.publish("~lamp/POWER", "ON").unwrap();
        gateway.publish("other/POWER", "OFF").unwrap();

        assert_eq!(
            transport.published(),
            [
                ("cmnd/lamp/POWER".to_string(), "ON".to_string()),
                ("other/POWER".to_string(), "OFF".to_string()),
            ]
        );
    }

    #[test]
    fn detached_gateway_reports_not_connected() {
        let gateway = CommandGateway::detached();
        assert!(matches!(
            gateway.publish("cmnd/x/POWER", ""),
            Err(TransportError::NotConnected)
        ));

        let transport = Arc::new(MemoryTransport::new());
        gateway.clone().attach(transport.clone());
        gateway.publish("cmnd/x/POWER", "").unwrap();
        assert_eq!(transport.published().len(), 1);
    }
}
