use std::str::FromStr;

/// All climatecore process parameters. Loaded from environment variables at
/// startup; every field has a default so the process runs unconfigured.
#[derive(Debug, Clone)]
pub struct ClimateCfg {
    // bus
    pub bus_url: String,
    pub readings_stream: String,
    pub config_subject: String,
    pub alerts_prefix: String,
    pub memory_subject: String,
    pub actions_subject: String,
    pub upstream_prefix: String,

    // per-sensor retention
    pub history_cap: usize,
    pub memory_cap: usize,

    // alert publishing
    pub publish_retries: u32,
    pub publish_backoff_ms: u64,

    // model calls
    pub model_retries: u32,
    pub model_backoff_ms: u64,
    pub model_timeout_secs: u64,
    pub model_concurrency: usize,

    // actuator workers
    pub worker_queue_cap: usize,

    // shutdown
    pub shutdown_timeout_secs: u64,

    pub debug: bool,
}

impl Default for ClimateCfg {
    fn default() -> Self {
        Self {
            bus_url: "nats://localhost:4222".into(),
            readings_stream: "environmental_sensors".into(),
            config_subject: "config.climatecore".into(),
            alerts_prefix: "alerts.climatecore".into(),
            memory_subject: "memory.climatecore".into(),
            actions_subject: "notifications.climatecore".into(),
            upstream_prefix: "upstream.climatecore".into(),
            history_cap: 50,
            memory_cap: 50,
            publish_retries: 3,
            publish_backoff_ms: 200,
            model_retries: 3,
            model_backoff_ms: 2000,
            model_timeout_secs: 60,
            model_concurrency: 2,
            worker_queue_cap: 16,
            shutdown_timeout_secs: 15,
            debug: false,
        }
    }
}

impl ClimateCfg {
    /// Read configuration from `CLIMATECORE_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bus_url: env_or("CLIMATECORE_BUS_URL", d.bus_url),
            readings_stream: env_or("CLIMATECORE_READINGS_STREAM", d.readings_stream),
            config_subject: env_or("CLIMATECORE_CONFIG_SUBJECT", d.config_subject),
            alerts_prefix: env_or("CLIMATECORE_ALERTS_PREFIX", d.alerts_prefix),
            memory_subject: env_or("CLIMATECORE_MEMORY_SUBJECT", d.memory_subject),
            actions_subject: env_or("CLIMATECORE_ACTIONS_SUBJECT", d.actions_subject),
            upstream_prefix: env_or("CLIMATECORE_UPSTREAM_PREFIX", d.upstream_prefix),
            history_cap: env_or("CLIMATECORE_HISTORY_CAP", d.history_cap),
            memory_cap: env_or("CLIMATECORE_MEMORY_CAP", d.memory_cap),
            publish_retries: env_or("CLIMATECORE_PUBLISH_RETRIES", d.publish_retries),
            publish_backoff_ms: env_or("CLIMATECORE_PUBLISH_BACKOFF_MS", d.publish_backoff_ms),
            model_retries: env_or("CLIMATECORE_MODEL_RETRIES", d.model_retries),
            model_backoff_ms: env_or("CLIMATECORE_MODEL_BACKOFF_MS", d.model_backoff_ms),
            model_timeout_secs: env_or("CLIMATECORE_MODEL_TIMEOUT_SECS", d.model_timeout_secs),
            model_concurrency: env_or("CLIMATECORE_MODEL_CONCURRENCY", d.model_concurrency),
            worker_queue_cap: env_or("CLIMATECORE_WORKER_QUEUE_CAP", d.worker_queue_cap),
            shutdown_timeout_secs: env_or(
                "CLIMATECORE_SHUTDOWN_TIMEOUT_SECS",
                d.shutdown_timeout_secs,
            ),
            debug: env_flag("CLIMATECORE_DEBUG"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}
