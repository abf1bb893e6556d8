use std::fmt::Write;

use climatecore_llm::provider::ChatMessage;

use crate::types::{Alert, MemoryRecord, ViolationSide};

const SYSTEM_PROMPT: &str = "\
You are a building climate assistant. You receive an out-of-bounds alert \
from one environmental sensor together with its recent readings and the \
suggestions you previously made for it. Propose at most one corrective \
action a human occupant could take right now.

Reply with a single JSON object and nothing else:
{\"action\": \"<short imperative action>\", \"reason\": \"<one sentence>\"}

If no action is warranted (for example the situation is already being \
addressed by a previous suggestion), reply with exactly [] instead.";

/// Build the chat transcript for one alert: static system prompt plus a
/// user message carrying the violation, recent readings, and prior
/// suggestions for the same sensor. `context` is most-recent-first as
/// recalled; it is rendered chronologically.
pub fn build_messages(alert: &Alert, context: &[MemoryRecord]) -> Vec<ChatMessage> {
    let mut body = String::new();
    let side = match alert.violation.side {
        ViolationSide::Low => "below minimum",
        ViolationSide::High => "above maximum",
    };
    let _ = writeln!(
        body,
        "Sensor {} reads {} ({} by {:.2}); allowed range is {} to {}.",
        alert.sensor_id,
        alert.violation.value,
        side,
        alert.violation.magnitude,
        alert.bounds.min,
        alert.bounds.max,
    );

    if let Some(latest) = alert.history.last() {
        let _ = writeln!(
            body,
            "Sensor type: {}, unit: {}, location: {}.",
            latest.reading.sensor_type.as_str(),
            latest.reading.unit,
            latest.reading.location,
        );
    }

    let _ = writeln!(body, "\nRecent readings (oldest first):");
    for entry in &alert.history {
        let _ = writeln!(
            body,
            "- {} {} at {} ({:?})",
            entry.reading.value,
            entry.reading.unit,
            entry.reading.timestamp.to_rfc3339(),
            entry.status,
        );
    }

    if context.is_empty() {
        let _ = writeln!(body, "\nNo previous suggestions for this sensor.");
    } else {
        let _ = writeln!(body, "\nPrevious suggestions (oldest first):");
        for record in context.iter().rev() {
            if record.action.is_empty() {
                let _ = writeln!(body, "- (no action) {}", record.reason);
            } else {
                let _ = writeln!(body, "- {}: {}", record.action, record.reason);
            }
        }
    }

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(body)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::{
        EvalStatus, HistoryEntry, SensorBounds, SensorReading, SensorType, Violation,
    };

    fn alert() -> Alert {
        let reading = SensorReading {
            sensor_id: "bedroom-1".into(),
            sensor_type: SensorType::Co2,
            value: 1450.0,
            unit: "ppm".into(),
            location: "bedroom".into(),
            timestamp: Utc::now(),
        };
        Alert {
            sequence: 7,
            sensor_id: "bedroom-1".into(),
            violation: Violation {
                side: ViolationSide::High,
                bound: 1200.0,
                value: 1450.0,
                magnitude: 250.0,
            },
            bounds: SensorBounds { min: 400.0, max: 1200.0, margin: None },
            history: vec![HistoryEntry { reading, status: EvalStatus::ViolatedHigh }],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn carries_violation_and_location() {
        let messages = build_messages(&alert(), &[]);
        assert_eq!(messages.len(), 2);
        let user = &messages[1].content;
        assert!(user.contains("bedroom-1"));
        assert!(user.contains("above maximum"));
        assert!(user.contains("location: bedroom"));
        assert!(user.contains("No previous suggestions"));
    }

    #[test]
    fn includes_prior_suggestions() {
        let context = vec![MemoryRecord {
            action: "open window".into(),
            reason: "co2 rising".into(),
            alert_sequence: 3,
            created_at: Utc::now(),
        }];
        let messages = build_messages(&alert(), &context);
        assert!(messages[1].content.contains("open window: co2 rising"));
    }
}
