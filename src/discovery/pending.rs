use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::state::{shared, Shared};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("node {address} was not acknowledged within {waited:?}")]
    Timeout { address: String, waited: Duration },

    #[error("creation of node {0} was abandoned")]
    Abandoned(String),
}

/// Rendezvous between node creation requests and the host's acknowledgments.
///
/// The reconciler registers an address before asking the host for the node,
/// the host event pump resolves it when `NodeAdded` arrives.
#[derive(Clone, Default)]
pub struct PendingCreations {
    waiting: Shared<HashMap<String, oneshot::Sender<()>>>,
}

impl PendingCreations {
    pub fn new() -> Self {
        Self {
            waiting: shared(HashMap::new()),
        }
    }

    /// Registers `address` as awaiting acknowledgment.
    pub fn expect(&self, address: &str) -> Creation {
        let (tx, rx) = oneshot::channel();
        if self.waiting.lock().insert(address.to_string(), tx).is_some() {
            warn!("Replacing pending creation for {address}");
        }
        Creation {
            address: address.to_string(),
            receiver: rx,
        }
    }

    /// Resolves the creation of `address`. False when nobody was waiting.
    pub fn acknowledge(&self, address: &str) -> bool {
        match self.waiting.lock().remove(address) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, address: &str) {
        self.waiting.lock().remove(address);
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

/// One in-flight creation.
#[derive(Debug)]
pub struct Creation {
    address: String,
    receiver: oneshot::Receiver<()>,
}

impl Creation {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits for the acknowledgment in `poll` sized slices, giving up after
    /// `limit` when one is set.
    pub async fn wait(mut self, poll: Duration, limit: Option<Duration>) -> Result<(), PendingError> {
        let mut waited = Duration::ZERO;
        loop {
            match tokio::time::timeout(poll, &mut self.receiver).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(_)) => return Err(PendingError::Abandoned(self.address)),
                Err(_) => {
                    waited += poll;
                    debug!("Still waiting for node {} after {waited:?}", self.address);
                    if limit.is_some_and(|limit| waited >= limit) {
                        return Err(PendingError::Timeout {
                            address: self.address,
                            waited,
                        });
                    }
                }
            }
        }
    }
}
