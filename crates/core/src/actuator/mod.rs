//! Action-side half of the pipeline: consumes alerts, asks the model for a
//! corrective suggestion, and publishes the results.
//!
//! One worker task per sensor id keeps same-sensor alerts strictly ordered
//! while different sensors proceed concurrently; the engine's semaphore
//! bounds how many model calls are actually in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use climatecore_bus::{BusError, MessageBus};
use climatecore_llm::provider::LlmProvider;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClimateCfg;
use crate::types::Alert;

pub mod engine;
pub mod memory;
pub mod prompt;

use engine::{ActionEngine, Outcome};
use memory::MemoryStore;

pub struct Actuator {
    bus: Arc<dyn MessageBus>,
    engine: Arc<ActionEngine>,
    cfg: ClimateCfg,
    ready: watch::Sender<bool>,
}

impl Actuator {
    pub fn new(bus: Arc<dyn MessageBus>, llm: Arc<dyn LlmProvider>, cfg: ClimateCfg) -> Self {
        let memory = Arc::new(MemoryStore::new(cfg.memory_cap));
        let engine = Arc::new(ActionEngine::new(
            llm,
            memory,
            Arc::clone(&bus),
            cfg.clone(),
        ));
        let (ready, _) = watch::channel(false);
        Self { bus, engine, cfg, ready }
    }

    /// Flips to true once the alert subscription is established.
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Consume alerts until cancelled, then drain in-flight work within the
    /// configured grace period.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BusError> {
        let pattern = format!("{}.>", self.cfg.alerts_prefix);
        let mut alerts_rx = self.bus.subscribe(&pattern).await?;
        self.ready.send_replace(true);
        info!(pattern = %pattern, "actuator consuming alerts");

        let mut workers: HashMap<String, mpsc::Sender<Alert>> = HashMap::new();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = alerts_rx.recv() => {
                    let Some(msg) = msg else {
                        // Bus gone: drain what we have and report.
                        self.drain(workers, tasks).await;
                        return Err(BusError::Unavailable("alert subscription closed".into()));
                    };
                    let alert: Alert = match serde_json::from_slice(&msg.payload) {
                        Ok(a) => a,
                        Err(e) => {
                            warn!(subject = %msg.subject, error = %e, "discarding malformed alert");
                            continue;
                        }
                    };
                    self.dispatch(alert, &mut workers, &mut tasks).await;
                }
            }
        }

        info!("actuator shutting down, draining workers");
        self.drain(workers, tasks).await;
        Ok(())
    }

    /// Route an alert to its sensor's worker, spawning the worker on first
    /// sight. The send applies backpressure when the worker's queue is full.
    async fn dispatch(
        &self,
        alert: Alert,
        workers: &mut HashMap<String, mpsc::Sender<Alert>>,
        tasks: &mut JoinSet<()>,
    ) {
        let tx = workers.entry(alert.sensor_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.cfg.worker_queue_cap);
            let engine = Arc::clone(&self.engine);
            let sensor_id = alert.sensor_id.clone();
            tasks.spawn(worker_loop(engine, sensor_id, rx));
            tx
        });
        if let Err(e) = tx.send(alert).await {
            warn!(sensor_id = %e.0.sensor_id, sequence = e.0.sequence, "worker gone, alert dropped");
        }
    }

    /// Close all worker queues and wait for them to finish their backlog.
    /// Workers still running at the grace deadline are aborted.
    async fn drain(&self, workers: HashMap<String, mpsc::Sender<Alert>>, mut tasks: JoinSet<()>) {
        drop(workers);
        let grace = Duration::from_secs(self.cfg.shutdown_timeout_secs);
        if tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!(grace_secs = grace.as_secs(), "grace period elapsed, aborting workers");
            tasks.shutdown().await;
        }
    }
}

/// One sensor's queue: alerts are handled strictly in arrival order.
async fn worker_loop(engine: Arc<ActionEngine>, sensor_id: String, mut rx: mpsc::Receiver<Alert>) {
    while let Some(alert) = rx.recv().await {
        let sequence = alert.sequence;
        match engine.handle(alert).await {
            Ok(Outcome::Published) => debug!(sensor_id = %sensor_id, sequence, "action published"),
            Ok(Outcome::NoAction) => debug!(sensor_id = %sensor_id, sequence, "no action"),
            Ok(Outcome::Duplicate) => {}
            Err(e) => warn!(sensor_id = %sensor_id, sequence, error = %e, "alert dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use climatecore_bus::MemoryBus;
    use climatecore_llm::provider::MockProvider;

    use crate::types::{SensorBounds, SuggestedAction, Violation, ViolationSide};

    fn alert_json(sensor_id: &str, sequence: u64) -> Vec<u8> {
        serde_json::to_vec(&Alert {
            sequence,
            sensor_id: sensor_id.into(),
            violation: Violation {
                side: ViolationSide::Low,
                bound: 10.0,
                value: 5.0,
                magnitude: 5.0,
            },
            bounds: SensorBounds { min: 10.0, max: 30.0, margin: None },
            history: Vec::new(),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn test_cfg() -> ClimateCfg {
        ClimateCfg {
            model_backoff_ms: 1,
            shutdown_timeout_secs: 5,
            ..ClimateCfg::default()
        }
    }

    #[tokio::test]
    async fn routes_bus_alerts_through_the_engine() {
        let bus = Arc::new(MemoryBus::new());
        let llm = Arc::new(MockProvider::new(r#"{"action":"open window","reason":"cold"}"#));
        let actuator = Arc::new(Actuator::new(
            bus.clone() as Arc<dyn MessageBus>,
            llm,
            test_cfg(),
        ));

        let mut ready = actuator.ready_signal();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let actuator = Arc::clone(&actuator);
            let shutdown = shutdown.clone();
            async move { actuator.run(shutdown).await }
        });
        ready.wait_for(|r| *r).await.unwrap();

        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();
        bus.publish("alerts.climatecore.a", alert_json("a", 1))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), actions.recv())
            .await
            .unwrap()
            .unwrap();
        let action: SuggestedAction = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(action.sensor_id, "a");
        assert_eq!(action.alert_sequence, 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    /// Completes only when the test hands out a permit, so alerts can be
    /// pinned inside a worker queue while shutdown begins.
    struct GatedProvider {
        release: Arc<tokio::sync::Semaphore>,
    }

    impl LlmProvider for GatedProvider {
        fn model(&self) -> &str {
            "gated-mock"
        }

        fn complete(
            &self,
            _request: climatecore_llm::provider::CompletionRequest,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = Result<
                            climatecore_llm::provider::CompletionResponse,
                            climatecore_llm::provider::LlmError,
                        >,
                    > + Send
                    + '_,
            >,
        > {
            let release = Arc::clone(&self.release);
            Box::pin(async move {
                release.acquire().await.unwrap().forget();
                Ok(climatecore_llm::provider::CompletionResponse {
                    content: r#"{"action":"x","reason":"y"}"#.into(),
                    input_tokens: 1,
                    output_tokens: 1,
                })
            })
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queued_alerts() {
        let bus = Arc::new(MemoryBus::new());
        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let llm = Arc::new(GatedProvider { release: Arc::clone(&release) });
        let actuator = Arc::new(Actuator::new(
            bus.clone() as Arc<dyn MessageBus>,
            llm,
            test_cfg(),
        ));

        let mut ready = actuator.ready_signal();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let actuator = Arc::clone(&actuator);
            let shutdown = shutdown.clone();
            async move { actuator.run(shutdown).await }
        });
        ready.wait_for(|r| *r).await.unwrap();

        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();
        for seq in 1..=3 {
            bus.publish("alerts.climatecore.a", alert_json("a", seq))
                .await
                .unwrap();
        }
        // Let the dispatcher route everything into the worker queue; the
        // worker itself is parked on the gated model call.
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        release.add_permits(3);
        task.await.unwrap().unwrap();

        // All three queued alerts were drained before exit, in order.
        for seq in 1..=3 {
            let msg = tokio::time::timeout(Duration::from_secs(1), actions.recv())
                .await
                .expect("drained alert")
                .unwrap();
            let action: SuggestedAction = serde_json::from_slice(&msg.payload).unwrap();
            assert_eq!(action.alert_sequence, seq);
        }
    }

    #[tokio::test]
    async fn malformed_alerts_are_skipped() {
        let bus = Arc::new(MemoryBus::new());
        let llm = Arc::new(MockProvider::new(r#"{"action":"x","reason":"y"}"#));
        let actuator = Arc::new(Actuator::new(
            bus.clone() as Arc<dyn MessageBus>,
            llm,
            test_cfg(),
        ));

        let mut ready = actuator.ready_signal();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let actuator = Arc::clone(&actuator);
            let shutdown = shutdown.clone();
            async move { actuator.run(shutdown).await }
        });
        ready.wait_for(|r| *r).await.unwrap();

        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();
        bus.publish("alerts.climatecore.a", b"garbage".to_vec())
            .await
            .unwrap();
        bus.publish("alerts.climatecore.a", alert_json("a", 1))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), actions.recv())
            .await
            .unwrap()
            .unwrap();
        let action: SuggestedAction = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(action.alert_sequence, 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
