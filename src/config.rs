use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::StreamError;
use crate::normalizer::NormalizerConfig;

/// Largest window a peer can advertise (65535 << 14)
pub const MAX_SCALED_WINDOW: u32 = 1_073_725_440;

/// Stream tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Only track flows whose three-way handshake was observed
    pub require_3whs: bool,

    /// Advertised windows above this are anomalous (0 disables the check)
    pub max_window: u32,

    /// Treat a zero timestamp as stale once timestamps are being tracked
    pub paws_drop_zero_ts: bool,

    /// Normalizer policy
    pub normalizer: NormalizerConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            require_3whs: false,
            max_window: 0,
            paws_drop_zero_ts: true,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: StreamConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;

        info!(
            "Loaded stream config (policy={}, require_3whs={}, max_window={})",
            config.normalizer.os_policy, config.require_3whs, config.max_window
        );

        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_window > MAX_SCALED_WINDOW {
            return Err(StreamError::ConfigError(format!(
                "max_window {} exceeds the largest scaled window {}",
                self.max_window, MAX_SCALED_WINDOW
            )));
        }
        Ok(())
    }
}
