use std::sync::Arc;

use tokio::sync::watch;

use crate::types::BoundsConfig;

/// Why a configuration message was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed bounds payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid bounds for {sensor}: {reason}")]
    Invalid { sensor: String, reason: String },
}

/// Holds the active boundary configuration as an atomically-swapped
/// immutable snapshot. Single writer (the config dispatch loop),
/// any number of readers; a reader observes either the fully-old or the
/// fully-new configuration, never a torn one.
pub struct BoundsStore {
    inner: watch::Sender<Arc<BoundsConfig>>,
}

impl BoundsStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(BoundsConfig::default()));
        Self { inner: tx }
    }

    /// Current snapshot. Cheap: clones the Arc, not the config.
    pub fn load(&self) -> Arc<BoundsConfig> {
        self.inner.borrow().clone()
    }

    /// True once a non-empty configuration has been accepted.
    pub fn is_configured(&self) -> bool {
        !self.inner.borrow().is_empty()
    }

    /// Validate and swap in a whole new configuration.
    /// On rejection the previous snapshot stays active.
    pub fn replace(&self, cfg: BoundsConfig) -> Result<(), ConfigError> {
        validate(&cfg)?;
        self.inner.send_replace(Arc::new(cfg));
        Ok(())
    }

    /// Parse a raw configuration payload and replace the active snapshot.
    /// Returns the number of configured sensor types.
    pub fn apply_json(&self, payload: &[u8]) -> Result<usize, ConfigError> {
        let cfg: BoundsConfig = serde_json::from_slice(payload)?;
        let count = cfg.len();
        self.replace(cfg)?;
        Ok(count)
    }
}

impl Default for BoundsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration with any invalid entry is rejected entirely —
/// never adopt a partially valid one.
fn validate(cfg: &BoundsConfig) -> Result<(), ConfigError> {
    for (sensor_type, bounds) in &cfg.0 {
        if bounds.min > bounds.max {
            return Err(ConfigError::Invalid {
                sensor: sensor_type.as_str().to_owned(),
                reason: format!("min {} exceeds max {}", bounds.min, bounds.max),
            });
        }
        if let Some(margin) = bounds.margin
            && margin < 0.0
        {
            return Err(ConfigError::Invalid {
                sensor: sensor_type.as_str().to_owned(),
                reason: format!("negative margin {margin}"),
            });
        }
    }
    Ok(())
}
