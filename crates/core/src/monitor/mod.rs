//! Reading-side half of the pipeline: consumes sensor readings and boundary
//! configuration from the bus, evaluates each reading, and publishes alerts.
//!
//! One evaluation worker per sensor id: unrelated sensors evaluate
//! concurrently, same-sensor readings stay strictly in arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use climatecore_bus::{BusError, BusMessage, MessageBus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClimateCfg;
use crate::types::SensorReading;

pub mod bounds;
pub mod evaluator;
pub mod history;
pub mod publisher;

use bounds::BoundsStore;
use evaluator::Evaluator;
use publisher::AlertPublisher;

pub struct Monitor {
    bus: Arc<dyn MessageBus>,
    bounds: Arc<BoundsStore>,
    evaluator: Arc<Evaluator>,
    publisher: Arc<AlertPublisher>,
    cfg: ClimateCfg,
    ready: watch::Sender<bool>,
}

impl Monitor {
    pub fn new(bus: Arc<dyn MessageBus>, cfg: ClimateCfg) -> Self {
        let bounds = Arc::new(BoundsStore::new());
        let evaluator = Arc::new(Evaluator::new(Arc::clone(&bounds), cfg.history_cap));
        let publisher = Arc::new(AlertPublisher::new(
            Arc::clone(&bus),
            cfg.alerts_prefix.clone(),
            cfg.publish_retries,
            cfg.publish_backoff_ms,
        ));
        let (ready, _) = watch::channel(false);
        Self { bus, bounds, evaluator, publisher, cfg, ready }
    }

    /// Flips to true once both subscriptions are established. Used by the
    /// composition root (and tests) to sequence startup against publishers.
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Consume until cancelled. No readings are evaluated before the first
    /// valid boundary configuration arrives; they queue in the subscription
    /// buffer and are drained afterwards.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BusError> {
        let mut config_rx = self.bus.subscribe(&self.cfg.config_subject).await?;
        let mut readings_rx = self.bus.subscribe(&self.cfg.readings_stream).await?;
        self.ready.send_replace(true);

        if !self.bounds.is_configured() {
            info!(subject = %self.cfg.config_subject, "waiting for configuration");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    msg = config_rx.recv() => match msg {
                        Some(msg) => {
                            self.handle_config(&msg);
                            if self.bounds.is_configured() {
                                break;
                            }
                        }
                        None => return Err(BusError::Unavailable("config subscription closed".into())),
                    },
                }
            }
        }

        info!(stream = %self.cfg.readings_stream, "monitor consuming readings");
        let mut workers: HashMap<String, mpsc::Sender<SensorReading>> = HashMap::new();
        let mut tasks = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("monitor shutting down");
                    break Ok(());
                }
                msg = config_rx.recv() => match msg {
                    Some(msg) => self.handle_config(&msg),
                    None => break Err(BusError::Unavailable("config subscription closed".into())),
                },
                msg = readings_rx.recv() => match msg {
                    Some(msg) => self.dispatch_reading(&msg, &mut workers, &mut tasks).await,
                    None => break Err(BusError::Unavailable("readings subscription closed".into())),
                },
            }
        };

        // Evaluation workers finish their queued readings before exit;
        // history updates are applied, in-flight alert publishes detach.
        drop(workers);
        while tasks.join_next().await.is_some() {}
        result
    }

    fn handle_config(&self, msg: &BusMessage) {
        match self.bounds.apply_json(&msg.payload) {
            Ok(count) => info!(sensor_types = count, "boundary configuration replaced"),
            // Rejected configs leave the previous snapshot active.
            Err(e) => warn!(error = %e, "rejected boundary configuration"),
        }
    }

    /// Route a reading to its sensor's evaluation worker, spawning the
    /// worker on first sight. The send applies backpressure per sensor.
    async fn dispatch_reading(
        &self,
        msg: &BusMessage,
        workers: &mut HashMap<String, mpsc::Sender<SensorReading>>,
        tasks: &mut JoinSet<()>,
    ) {
        let reading: SensorReading = match serde_json::from_slice(&msg.payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "discarding malformed reading");
                return;
            }
        };

        let tx = workers.entry(reading.sensor_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.cfg.worker_queue_cap);
            let evaluator = Arc::clone(&self.evaluator);
            let publisher = Arc::clone(&self.publisher);
            tasks.spawn(evaluation_loop(evaluator, publisher, rx));
            tx
        });
        if let Err(e) = tx.send(reading).await {
            warn!(sensor_id = %e.0.sensor_id, "evaluation worker gone, reading dropped");
        }
    }
}

/// One sensor's readings, evaluated strictly in arrival order.
async fn evaluation_loop(
    evaluator: Arc<Evaluator>,
    publisher: Arc<AlertPublisher>,
    mut rx: mpsc::Receiver<SensorReading>,
) {
    while let Some(reading) = rx.recv().await {
        let sensor_id = reading.sensor_id.clone();
        let result = evaluator.evaluate(reading).await;
        debug!(sensor_id = %sensor_id, status = ?result.status, "reading evaluated");

        if let Some(alert) = result.alert {
            info!(
                sensor_id = %sensor_id,
                sequence = alert.sequence,
                side = ?alert.violation.side,
                "bounds violated, emitting alert"
            );
            publisher.publish_detached(alert);
        }
    }
}
