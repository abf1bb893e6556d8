use std::sync::Arc;

use climatecore_bus::{MemoryBus, MessageBus};
use climatecore_core::actuator::Actuator;
use climatecore_core::config::ClimateCfg;
use climatecore_core::monitor::Monitor;
use climatecore_core::shutdown::ShutdownGuard;
use climatecore_llm::provider::LlmProvider;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ClimateCfg::from_env();

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json().with_target(true))
        .init();

    info!(
        readings_stream = %cfg.readings_stream,
        config_subject = %cfg.config_subject,
        "climatecore starting"
    );

    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let guard = ShutdownGuard::new();
    guard.listen();

    let monitor = Arc::new(Monitor::new(Arc::clone(&bus), cfg.clone()));
    let monitor_task = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        let token = guard.token();
        async move { monitor.run(token).await }
    });

    // No model configured = monitor-only mode: alerts are still published,
    // nothing consumes them in-process.
    let actuator_task = match climatecore_llm::http::from_env() {
        Some(provider) => {
            info!(model = provider.model(), "actuator enabled");
            let llm: Arc<dyn LlmProvider> = Arc::new(provider);
            let actuator = Arc::new(Actuator::new(Arc::clone(&bus), llm, cfg.clone()));
            Some(tokio::spawn({
                let actuator = Arc::clone(&actuator);
                let token = guard.token();
                async move { actuator.run(token).await }
            }))
        }
        None => {
            warn!("no model configured (LLM_MODEL / LLM_API_KEY), actuator disabled");
            None
        }
    };

    let monitor_result = monitor_task.await?;
    // Monitor exit (signal or bus loss) ends the process: let the actuator
    // drain its workers before reporting.
    guard.trigger();
    if let Some(task) = actuator_task {
        task.await??;
    }
    monitor_result?;

    info!("climatecore stopped");
    Ok(())
}
