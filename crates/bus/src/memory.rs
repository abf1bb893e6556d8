use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::subject::subject_matches;
use crate::{BusError, BusMessage, MessageBus, Subscription};

/// Per-subscriber buffer. A subscriber that falls this far behind starts
/// losing messages rather than growing memory without bound.
const SUBSCRIBER_BUFFER: usize = 256;

struct Subscriber {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

/// In-process bus: fan-out over bounded channels, no durability.
/// Delivery is at-most-once per live subscriber, in publish order.
pub struct MemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        // Drop subscribers whose receiver side is gone.
        subs.retain(|s| !s.tx.is_closed());

        for sub in subs.iter() {
            if !subject_matches(&sub.pattern, subject) {
                continue;
            }
            let msg = BusMessage::new(subject, payload.clone());
            if sub.tx.try_send(msg).is_err() {
                tracing::warn!(subject, pattern = %sub.pattern, "slow subscriber, message dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        subs.push(Subscriber {
            pattern: subject.to_owned(),
            tx,
        });
        Ok(rx)
    }
}
