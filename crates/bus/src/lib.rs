//! Message-bus seam for climatecore.
//!
//! The transport itself is a given substrate: this crate only defines the
//! publish/subscribe interface the monitor and actuator are written against,
//! plus [`MemoryBus`], an in-process implementation used by the
//! single-process binary and by tests. A broker-backed implementation is a
//! drop-in behind the same trait.

mod memory;
mod subject;

pub use memory::MemoryBus;
pub use subject::subject_matches;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A message delivered on a subject.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Error type for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("publish to {subject} failed: {reason}")]
    PublishFailed { subject: String, reason: String },
    #[error("subscribe to {subject} failed: {reason}")]
    SubscribeFailed { subject: String, reason: String },
}

/// Stream of messages matching a subscription.
pub type Subscription = mpsc::Receiver<BusMessage>;

/// Pub/sub transport. Subjects are dot-separated tokens; subscriptions may
/// use `*` to match one token and a trailing `>` to match the rest.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;
}
