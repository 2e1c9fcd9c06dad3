use parking_lot::Mutex;

use super::{Transport, TransportError};

/// Transport that records every call instead of talking to a broker.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<(String, String)>>,
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    disconnected: Mutex<bool>,
    // Subscription requests accepted before the queue reports full
    capacity: Mutex<Option<usize>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts only `requests` subscribe/unsubscribe calls, then fails with
    /// [`TransportError::QueueFull`]. `None` lifts the limit.
    pub fn set_capacity(&self, requests: Option<usize>) {
        *self.capacity.lock() = requests;
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.subscribed.lock().clear();
        self.unsubscribed.lock().clear();
    }

    fn take_slot(&self) -> Result<(), TransportError> {
        match &mut *self.capacity.lock() {
            Some(0) => Err(TransportError::QueueFull),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let payload = String::from_utf8_lossy(&payload).into_owned();
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        self.take_slot()?;
        self.subscribed.lock().extend_from_slice(topics);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.take_slot()?;
        self.unsubscribed.lock().push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnected.lock() = true;
        Ok(())
    }
}
