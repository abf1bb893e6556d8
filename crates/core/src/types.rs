use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of environmental quantity a sensor measures.
/// Unknown kinds round-trip losslessly through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Co2,
    #[serde(untagged)]
    Other(String),
}

impl SensorType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Co2 => "co2",
            Self::Other(s) => s,
        }
    }
}

/// One reading as received from the bus. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub value: f64,
    pub unit: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

/// Boundary configuration for one sensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorBounds {
    pub min: f64,
    pub max: f64,
    /// Hysteresis margin: once alerting, a sensor only returns to normal
    /// when its value is within [min+margin, max-margin].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
}

impl SensorBounds {
    /// Check a value against [min, max].
    pub fn check(&self, value: f64) -> Option<Violation> {
        if value < self.min {
            Some(Violation {
                side: ViolationSide::Low,
                bound: self.min,
                value,
                magnitude: self.min - value,
            })
        } else if value > self.max {
            Some(Violation {
                side: ViolationSide::High,
                bound: self.max,
                value,
                magnitude: value - self.max,
            })
        } else {
            None
        }
    }

    /// Whether a value clears the hysteresis band for leaving Alerting.
    pub fn cleared(&self, value: f64) -> bool {
        let m = self.margin.unwrap_or(0.0);
        value >= self.min + m && value <= self.max - m
    }
}

/// The full active boundary configuration, keyed by sensor type.
/// Replaced wholesale on every configuration message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundsConfig(pub HashMap<SensorType, SensorBounds>);

impl BoundsConfig {
    pub fn get(&self, sensor_type: &SensorType) -> Option<&SensorBounds> {
        self.0.get(sensor_type)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of checking one reading against the active bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    InBounds,
    ViolatedLow,
    ViolatedHigh,
    /// No bounds configured for the sensor type — fail open, never alert.
    Unconfigured,
}

/// Which side of the bounds was crossed, and by how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSide {
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub side: ViolationSide,
    pub bound: f64,
    pub value: f64,
    pub magnitude: f64,
}

/// A retained reading plus its evaluation outcome at record time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub reading: SensorReading,
    pub status: EvalStatus,
}

/// Emitted once per Normal→Alerting transition, carrying the full history
/// snapshot for the sensor. The triggering reading is the newest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub sequence: u64,
    pub sensor_id: String,
    pub violation: Violation,
    pub bounds: SensorBounds,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

/// One previously issued suggestion, retained per sensor for model context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub action: String,
    pub reason: String,
    pub alert_sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// The actuator's published result for one alert.
/// An empty `action` means the model deliberately suggested nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub id: Uuid,
    pub sensor_id: String,
    pub alert_sequence: u64,
    pub action: String,
    pub reason: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl SuggestedAction {
    pub fn is_actionable(&self) -> bool {
        !self.action.is_empty()
    }
}

/// Condensed form forwarded to higher-level consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub sensor_id: String,
    pub alert_sequence: u64,
    pub headline: String,
    pub detail: String,
}
