use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use climatecore_bus::MessageBus;
use climatecore_llm::provider::{CompletionRequest, LlmProvider};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::memory::MemoryStore;
use super::prompt;
use crate::config::ClimateCfg;
use crate::types::{Alert, MemoryRecord, SuggestedAction, Summary};

const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.7;

/// Per-sensor count of remembered sequence numbers for redelivery dedupe.
const DEDUPE_WINDOW: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("model gave no usable reply after {attempts} attempts: {last_error}")]
    ModelExhausted { attempts: u32, last_error: String },
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// How one alert was resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A suggested action was published.
    Published,
    /// The model deliberately suggested nothing.
    NoAction,
    /// The alert sequence was already processed; skipped entirely.
    Duplicate,
}

/// The model's reply, after extraction from whatever text surrounds it.
#[derive(Debug, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub reason: String,
}

impl ModelReply {
    fn none() -> Self {
        Self {
            action: String::new(),
            reason: "no action suggested".into(),
        }
    }
}

/// Extract the reply object from raw model output. Models wrap JSON in
/// prose or code fences often enough that we take the outermost braces
/// rather than demanding a clean document. An empty reply or a bare `[]`
/// is the explicit no-action convention.
pub fn parse_reply(raw: &str) -> Result<ModelReply, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(ModelReply::none());
    }
    let start = trimmed.find('{').ok_or("reply contains no JSON object")?;
    let end = trimmed.rfind('}').ok_or("reply contains no JSON object")?;
    if end < start {
        return Err("reply contains no JSON object".into());
    }
    serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
}

/// Turns one alert into at most one suggested action: recalls the sensor's
/// memory, calls the model under the shared concurrency limit, records the
/// outcome, and publishes downstream.
pub struct ActionEngine {
    llm: Arc<dyn LlmProvider>,
    memory: Arc<MemoryStore>,
    bus: Arc<dyn MessageBus>,
    cfg: ClimateCfg,
    semaphore: Arc<Semaphore>,
    processed: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl ActionEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        memory: Arc<MemoryStore>,
        bus: Arc<dyn MessageBus>,
        cfg: ClimateCfg,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(cfg.model_concurrency));
        Self {
            llm,
            memory,
            bus,
            cfg,
            semaphore,
            processed: Mutex::new(HashMap::new()),
        }
    }

    /// Process one alert end to end. A model failure drops the alert
    /// without recording memory or publishing anything; the sequence stays
    /// unprocessed so a redelivery gets a fresh attempt.
    pub async fn handle(&self, alert: Alert) -> Result<Outcome, ActionError> {
        if self.already_processed(&alert) {
            warn!(
                sensor_id = %alert.sensor_id,
                sequence = alert.sequence,
                "duplicate alert, skipping"
            );
            return Ok(Outcome::Duplicate);
        }

        let context = self.memory.recall(&alert.sensor_id);
        let request = CompletionRequest {
            messages: prompt::build_messages(&alert, &context),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };
        let reply = self.invoke_model(request).await?;

        let record = MemoryRecord {
            action: reply.action.clone(),
            reason: reply.reason.clone(),
            alert_sequence: alert.sequence,
            created_at: Utc::now(),
        };
        self.memory.record(&alert.sensor_id, record.clone());
        self.announce_memory(&alert.sensor_id, &record).await;

        let outcome = if reply.action.is_empty() {
            info!(
                sensor_id = %alert.sensor_id,
                sequence = alert.sequence,
                reason = %reply.reason,
                "model suggested no action"
            );
            Outcome::NoAction
        } else {
            self.publish_action(&alert, reply).await;
            Outcome::Published
        };

        self.mark_processed(&alert);
        Ok(outcome)
    }

    /// Call the model under the shared semaphore, with a per-call timeout
    /// and bounded retries. Unparsable replies count as failed attempts.
    async fn invoke_model(&self, request: CompletionRequest) -> Result<ModelReply, ActionError> {
        let timeout = Duration::from_secs(self.cfg.model_timeout_secs);
        let mut backoff = Duration::from_millis(self.cfg.model_backoff_ms);
        let mut attempt = 0;
        let mut last_error;
        loop {
            attempt += 1;
            let permit = match self.semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => return Err(ActionError::ShuttingDown),
            };
            let outcome = tokio::time::timeout(timeout, self.llm.complete(request.clone())).await;
            drop(permit);

            match outcome {
                Ok(Ok(response)) => match parse_reply(&response.content) {
                    Ok(reply) => {
                        debug!(
                            input_tokens = response.input_tokens,
                            output_tokens = response.output_tokens,
                            attempt,
                            "model reply accepted"
                        );
                        return Ok(reply);
                    }
                    Err(e) => last_error = format!("unparsable reply: {e}"),
                },
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {}s", timeout.as_secs()),
            }

            if attempt > self.cfg.model_retries {
                return Err(ActionError::ModelExhausted { attempts: attempt, last_error });
            }
            warn!(attempt, error = %last_error, "model call failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    /// Publish the suggested action and its upstream summary in parallel.
    /// Both are best effort; a lost publish is logged, not retried.
    async fn publish_action(&self, alert: &Alert, reply: ModelReply) {
        let action = SuggestedAction {
            id: Uuid::new_v4(),
            sensor_id: alert.sensor_id.clone(),
            alert_sequence: alert.sequence,
            action: reply.action,
            reason: reply.reason,
            model: self.llm.model().to_owned(),
            created_at: Utc::now(),
        };
        let summary = Summary {
            sensor_id: alert.sensor_id.clone(),
            alert_sequence: alert.sequence,
            headline: action.action.clone(),
            detail: action.reason.clone(),
        };
        info!(
            sensor_id = %alert.sensor_id,
            sequence = alert.sequence,
            action = %action.action,
            "publishing suggested action"
        );

        let upstream_subject = format!("{}.{}", self.cfg.upstream_prefix, alert.sensor_id);
        let (sent_action, sent_summary) = tokio::join!(
            self.publish_json(&self.cfg.actions_subject, &action),
            self.publish_json(&upstream_subject, &summary),
        );
        if !sent_action {
            warn!(sequence = alert.sequence, "suggested action lost");
        }
        if !sent_summary {
            warn!(sequence = alert.sequence, "upstream summary lost");
        }
    }

    async fn announce_memory(&self, sensor_id: &str, record: &MemoryRecord) {
        if !self.publish_json(&self.cfg.memory_subject, record).await {
            warn!(sensor_id = %sensor_id, "memory announcement lost");
        }
    }

    async fn publish_json<T: serde::Serialize>(&self, subject: &str, value: &T) -> bool {
        let payload = match serde_json::to_vec(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(subject = %subject, error = %e, "serialization failed");
                return false;
            }
        };
        match self.bus.publish(subject, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(subject = %subject, error = %e, "publish failed");
                false
            }
        }
    }

    /// Exact-match dedupe. Alerts can reach the bus out of sequence order
    /// (publish retries delay one while a later one lands first), so a
    /// watermark would misclassify a late distinct alert as a redelivery.
    fn already_processed(&self, alert: &Alert) -> bool {
        let seen = self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        seen.get(&alert.sensor_id)
            .is_some_and(|s| s.contains(&alert.sequence))
    }

    fn mark_processed(&self, alert: &Alert) {
        let mut seen = self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = seen.entry(alert.sensor_id.clone()).or_default();
        if entry.len() == DEDUPE_WINDOW {
            entry.pop_front();
        }
        entry.push_back(alert.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use climatecore_bus::MemoryBus;
    use climatecore_llm::provider::{FailingProvider, MockProvider};

    use crate::types::{SensorBounds, Violation, ViolationSide};

    fn alert(sensor_id: &str, sequence: u64) -> Alert {
        Alert {
            sequence,
            sensor_id: sensor_id.into(),
            violation: Violation {
                side: ViolationSide::High,
                bound: 1200.0,
                value: 1500.0,
                magnitude: 300.0,
            },
            bounds: SensorBounds { min: 400.0, max: 1200.0, margin: None },
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn engine(llm: Arc<dyn LlmProvider>, bus: Arc<MemoryBus>) -> ActionEngine {
        let cfg = ClimateCfg {
            model_retries: 1,
            model_backoff_ms: 1,
            model_timeout_secs: 1,
            ..ClimateCfg::default()
        };
        ActionEngine::new(llm, Arc::new(MemoryStore::new(cfg.memory_cap)), bus, cfg)
    }

    #[test]
    fn parse_reply_accepts_plain_json() {
        let reply = parse_reply(r#"{"action":"open window","reason":"co2 high"}"#).unwrap();
        assert_eq!(reply.action, "open window");
        assert_eq!(reply.reason, "co2 high");
    }

    #[test]
    fn parse_reply_strips_surrounding_prose_and_fences() {
        let raw = "Sure! Here is my suggestion:\n```json\n{\"action\": \"start fan\", \"reason\": \"humidity\"}\n```\nLet me know.";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.action, "start fan");
    }

    #[test]
    fn parse_reply_empty_and_brackets_mean_no_action() {
        for raw in ["", "   ", "[]", "\n[]\n"] {
            let reply = parse_reply(raw).unwrap();
            assert!(reply.action.is_empty());
        }
    }

    #[test]
    fn parse_reply_rejects_garbage() {
        assert!(parse_reply("no json here").is_err());
        assert!(parse_reply("{not valid json}").is_err());
    }

    #[tokio::test]
    async fn publishes_action_memory_and_summary() {
        let bus = Arc::new(MemoryBus::new());
        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();
        let mut upstream = bus.subscribe("upstream.climatecore.>").await.unwrap();
        let mut memory = bus.subscribe("memory.climatecore").await.unwrap();

        let llm = Arc::new(MockProvider::new(
            r#"{"action":"open window","reason":"co2 high"}"#,
        ));
        let engine = engine(llm, bus.clone());

        let outcome = engine.handle(alert("bedroom-1", 1)).await.unwrap();
        assert_eq!(outcome, Outcome::Published);

        let msg = actions.recv().await.unwrap();
        let action: SuggestedAction = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(action.action, "open window");
        assert_eq!(action.model, "mock");
        assert_eq!(action.alert_sequence, 1);

        let msg = upstream.recv().await.unwrap();
        assert_eq!(msg.subject, "upstream.climatecore.bedroom-1");
        let summary: Summary = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(summary.headline, "open window");

        let msg = memory.recv().await.unwrap();
        let record: MemoryRecord = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(record.action, "open window");
        assert_eq!(engine.memory.len("bedroom-1"), 1);
    }

    #[tokio::test]
    async fn no_action_reply_records_memory_but_publishes_nothing() {
        let bus = Arc::new(MemoryBus::new());
        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();

        let engine = engine(Arc::new(MockProvider::new("[]")), bus.clone());
        let outcome = engine.handle(alert("a", 1)).await.unwrap();
        assert_eq!(outcome, Outcome::NoAction);

        // Memory still grows so the next prompt sees the decision.
        assert_eq!(engine.memory.len("a"), 1);
        assert_eq!(engine.memory.recall("a")[0].reason, "no action suggested");
        assert!(actions.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_sequence_is_skipped() {
        let bus = Arc::new(MemoryBus::new());
        let engine = engine(
            Arc::new(MockProvider::new(r#"{"action":"x","reason":"y"}"#)),
            bus,
        );

        assert_eq!(engine.handle(alert("a", 1)).await.unwrap(), Outcome::Published);
        assert_eq!(engine.handle(alert("a", 1)).await.unwrap(), Outcome::Duplicate);
        // Only the first run recorded memory.
        assert_eq!(engine.memory.len("a"), 1);

        // A later sequence for the same sensor is fresh work.
        assert_eq!(engine.handle(alert("a", 2)).await.unwrap(), Outcome::Published);
    }

    #[tokio::test]
    async fn late_lower_sequence_is_distinct_work_not_a_duplicate() {
        let bus = Arc::new(MemoryBus::new());
        let engine = engine(
            Arc::new(MockProvider::new(r#"{"action":"x","reason":"y"}"#)),
            bus,
        );

        // Publish retries can delay an alert past its successor; the late
        // arrival has never been handled and must not be skipped.
        assert_eq!(engine.handle(alert("a", 2)).await.unwrap(), Outcome::Published);
        assert_eq!(engine.handle(alert("a", 1)).await.unwrap(), Outcome::Published);
        assert_eq!(engine.memory.len("a"), 2);

        // An actual redelivery of either sequence is still deduped.
        assert_eq!(engine.handle(alert("a", 1)).await.unwrap(), Outcome::Duplicate);
        assert_eq!(engine.handle(alert("a", 2)).await.unwrap(), Outcome::Duplicate);
        assert_eq!(engine.memory.len("a"), 2);
    }

    #[tokio::test]
    async fn exhausted_model_drops_alert_without_side_effects() {
        let bus = Arc::new(MemoryBus::new());
        let mut actions = bus.subscribe("notifications.climatecore").await.unwrap();
        let engine = engine(Arc::new(FailingProvider), bus.clone());

        let err = engine.handle(alert("a", 1)).await.unwrap_err();
        match err {
            ActionError::ModelExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.memory.len("a"), 0);
        assert!(actions.try_recv().is_err());

        // The sequence was not marked processed: a redelivery is retried.
        let engine_ok = ActionEngine::new(
            Arc::new(MockProvider::new(r#"{"action":"x","reason":"y"}"#)),
            Arc::clone(&engine.memory),
            bus,
            engine.cfg.clone(),
        );
        assert_eq!(engine_ok.handle(alert("a", 1)).await.unwrap(), Outcome::Published);
    }

    #[tokio::test]
    async fn unparsable_replies_exhaust_retries() {
        let bus = Arc::new(MemoryBus::new());
        let engine = engine(Arc::new(MockProvider::new("I cannot help with that.")), bus);

        let err = engine.handle(alert("a", 1)).await.unwrap_err();
        assert!(matches!(err, ActionError::ModelExhausted { .. }));
        assert!(err.to_string().contains("unparsable reply"));
    }
}
