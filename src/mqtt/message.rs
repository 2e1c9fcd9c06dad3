use std::fmt;

use chrono::{DateTime, Local};

/// One inbound publish as handed to the router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(40).collect();
        write!(f, "{} {} - {}", self.timestamp.format("%H:%M:%S%.3f"), self.topic, preview)
    }
}

impl MqttMessage {
    pub fn from_publish(topic: &str, payload: &[u8]) -> Self {
        MqttMessage {
            topic: topic.to_string(),
            content: String::from_utf8_lossy(payload).into_owned(),
            timestamp: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_long_payloads() {
        let message = MqttMessage::from_publish("tele/x/SENSOR", "a".repeat(100).as_bytes());
        let rendered = message.to_string();
        assert!(rendered.contains("tele/x/SENSOR"));
        assert!(rendered.ends_with(&"a".repeat(40)));
        assert!(!rendered.contains(&"a".repeat(41)));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let message = MqttMessage::from_publish("t", &[0x4f, 0x4e, 0xff]);
        assert_eq!(message.content, "ON\u{fffd}");
    }
}
