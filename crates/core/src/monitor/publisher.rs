use std::sync::Arc;
use std::time::Duration;

use climatecore_bus::{BusError, MessageBus};
use tracing::{debug, warn};

use crate::types::Alert;

/// Publishes alerts to `{prefix}.{sensor_id}` with bounded retries.
/// After the retry budget is spent the alert is dropped and reported;
/// a stuck bus must never stall reading evaluation.
pub struct AlertPublisher {
    bus: Arc<dyn MessageBus>,
    prefix: String,
    retries: u32,
    backoff: Duration,
}

impl AlertPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, prefix: String, retries: u32, backoff_ms: u64) -> Self {
        Self {
            bus,
            prefix,
            retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Publish one alert, retrying with doubling backoff. Returns the last
    /// bus error once all attempts are exhausted.
    pub async fn publish(&self, alert: &Alert) -> Result<(), BusError> {
        let subject = format!("{}.{}", self.prefix, alert.sensor_id);
        let payload = match serde_json::to_vec(alert) {
            Ok(p) => p,
            Err(e) => {
                return Err(BusError::PublishFailed {
                    subject,
                    reason: format!("alert serialization: {e}"),
                });
            }
        };

        let mut backoff = self.backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.bus.publish(&subject, payload.clone()).await {
                Ok(()) => {
                    debug!(
                        subject = %subject,
                        sequence = alert.sequence,
                        attempt,
                        "alert published"
                    );
                    return Ok(());
                }
                Err(e) if attempt <= self.retries => {
                    warn!(
                        subject = %subject,
                        sequence = alert.sequence,
                        attempt,
                        error = %e,
                        "alert publish failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fire-and-forget variant used by the dispatch loop: retries run in a
    /// spawned task so evaluation keeps up with the reading stream.
    pub fn publish_detached(self: &Arc<Self>, alert: Alert) {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&alert).await {
                warn!(
                    sensor_id = %alert.sensor_id,
                    sequence = alert.sequence,
                    error = %e,
                    "alert dropped after exhausting publish retries"
                );
            }
        });
    }
}
