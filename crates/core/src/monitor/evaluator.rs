use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use super::bounds::BoundsStore;
use super::history::HistoryBuffer;
use crate::types::{
    Alert, EvalStatus, HistoryEntry, SensorReading, ViolationSide,
};

/// Per-sensor alert state machine. Explicit two-state enum with guarded
/// transitions so the hysteresis logic stays auditable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Normal,
    Alerting,
}

/// Everything owned by one sensor id: its history and its alert state.
/// Serialized under one lock so same-sensor readings are strictly ordered
/// while unrelated sensors evaluate in parallel.
struct SensorState {
    history: HistoryBuffer,
    state: AlertState,
}

/// Result of evaluating a single reading.
#[derive(Debug)]
pub struct EvaluationResult {
    pub status: EvalStatus,
    /// Present only on the Normal→Alerting edge.
    pub alert: Option<Alert>,
}

impl EvaluationResult {
    pub fn alert_emitted(&self) -> bool {
        self.alert.is_some()
    }
}

/// The bounds engine: checks readings, maintains per-sensor history, and
/// decides alert emission (edge-triggered, with optional hysteresis).
pub struct Evaluator {
    bounds: Arc<BoundsStore>,
    sensors: Mutex<HashMap<String, Arc<tokio::sync::Mutex<SensorState>>>>,
    sequence: AtomicU64,
    history_cap: usize,
}

impl Evaluator {
    pub fn new(bounds: Arc<BoundsStore>, history_cap: usize) -> Self {
        Self {
            bounds,
            sensors: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(1),
            history_cap,
        }
    }

    /// Evaluate one reading. Always records it to history (whatever its
    /// status), then runs the alert state machine.
    pub async fn evaluate(&self, reading: SensorReading) -> EvaluationResult {
        let cfg = self.bounds.load();
        let bounds = cfg.get(&reading.sensor_type).cloned();
        let slot = self.slot(&reading.sensor_id);
        let mut sensor = slot.lock().await;

        let violation = bounds.as_ref().and_then(|b| b.check(reading.value));
        let status = match (&bounds, &violation) {
            (None, _) => EvalStatus::Unconfigured,
            (Some(_), None) => EvalStatus::InBounds,
            (Some(_), Some(v)) => match v.side {
                ViolationSide::Low => EvalStatus::ViolatedLow,
                ViolationSide::High => EvalStatus::ViolatedHigh,
            },
        };

        // History first: an emitted alert's snapshot must include the
        // triggering reading as its newest entry.
        sensor.history.push(HistoryEntry { reading: reading.clone(), status });

        let alert = match (sensor.state, violation, bounds) {
            // Edge trigger: the only point an alert is emitted.
            (AlertState::Normal, Some(violation), Some(bounds)) => {
                sensor.state = AlertState::Alerting;
                Some(Alert {
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                    sensor_id: reading.sensor_id.clone(),
                    violation,
                    bounds,
                    history: sensor.history.snapshot(),
                    created_at: Utc::now(),
                })
            }
            // Recovery: requires clearing the hysteresis band. Silent.
            (AlertState::Alerting, None, Some(bounds))
                if status == EvalStatus::InBounds && bounds.cleared(reading.value) =>
            {
                sensor.state = AlertState::Normal;
                None
            }
            // Already alerting, still violated: no further alerts.
            // Unconfigured: no transition either way (fail open).
            _ => None,
        };

        EvaluationResult { status, alert }
    }

    fn slot(&self, sensor_id: &str) -> Arc<tokio::sync::Mutex<SensorState>> {
        let mut sensors = self
            .sensors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sensors
            .entry(sensor_id.to_owned())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(SensorState {
                    history: HistoryBuffer::new(self.history_cap),
                    state: AlertState::Normal,
                }))
            })
            .clone()
    }
}
