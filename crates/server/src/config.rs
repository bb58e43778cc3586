use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors from loading or validating a [`ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server tuning. Every field has a default, so a partial YAML file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Time between frame starts.
    #[serde(default = "default_tick_interval_us")]
    pub tick_interval_us: u64,
    /// The loop sleeps until this long before a deadline, then spins.
    #[serde(default = "default_busywait_margin_us")]
    pub busywait_margin_us: u64,
    /// Terrain cells per axis.
    #[serde(default = "default_terrain_size")]
    pub terrain_size: u32,
    /// A frame longer than this many tick intervals is logged as an overrun.
    #[serde(default = "default_overrun_warn_factor")]
    pub overrun_warn_factor: f64,
    /// Frame time samples kept for the average/min/max statistics.
    #[serde(default = "default_frame_history")]
    pub frame_history: usize,
}

fn default_tick_interval_us() -> u64 {
    16_000
}

fn default_busywait_margin_us() -> u64 {
    100
}

fn default_terrain_size() -> u32 {
    1921
}

fn default_overrun_warn_factor() -> f64 {
    2.0
}

fn default_frame_history() -> usize {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: default_tick_interval_us(),
            busywait_margin_us: default_busywait_margin_us(),
            terrain_size: default_terrain_size(),
            overrun_warn_factor: default_overrun_warn_factor(),
            frame_history: default_frame_history(),
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading server config");
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_us == 0 {
            return Err(ConfigError::Invalid("tick_interval_us must be positive".into()));
        }
        if self.busywait_margin_us > self.tick_interval_us {
            return Err(ConfigError::Invalid(
                "busywait_margin_us must not exceed tick_interval_us".into(),
            ));
        }
        if self.terrain_size == 0 {
            return Err(ConfigError::Invalid("terrain_size must be positive".into()));
        }
        if self.frame_history == 0 {
            return Err(ConfigError::Invalid("frame_history must be positive".into()));
        }
        if self.overrun_warn_factor.is_nan() || self.overrun_warn_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "overrun_warn_factor must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }

    pub fn busywait_margin(&self) -> Duration {
        Duration::from_micros(self.busywait_margin_us)
    }

    /// Frame duration above which an overrun is reported.
    pub fn overrun_threshold(&self) -> Duration {
        self.tick_interval().mul_f64(self.overrun_warn_factor)
    }
}
