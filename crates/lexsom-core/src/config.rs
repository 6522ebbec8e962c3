//! Engine configuration: grid shape, schedules, k-means settings.
//!
//! Fixed at engine construction. Persisted as TOML in the app data directory
//! so the CLI can reuse the same settings across runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app_data;

const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_WIDTH: usize = 10;
pub const DEFAULT_HEIGHT: usize = 10;
pub const DEFAULT_DIMENSIONS: usize = 384;
pub const DEFAULT_LEARNING_RATE: f32 = 0.1;
pub const DEFAULT_RADIUS: f32 = 3.0;
pub const DEFAULT_MAX_EPOCHS: usize = 100;
pub const DEFAULT_CLUSTER_COUNT: usize = 8;
pub const DEFAULT_KMEANS_MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Grid columns.
    pub width: usize,
    /// Grid rows.
    pub height: usize,
    /// Embedding dimensionality every input vector must match.
    pub dimensions: usize,
    /// Learning rate at epoch 0; decays as `lr0 * e^(-epoch / max_epochs)`.
    pub learning_rate: f32,
    /// Neighborhood radius at epoch 0, in grid steps (Manhattan).
    pub radius: f32,
    pub max_epochs: usize,
    /// Number of k-means partitions over the trained codebook.
    pub cluster_count: usize,
    pub kmeans_max_iterations: usize,
    /// Seed for weight init, shuffling and centroid sampling. `None` draws from OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            dimensions: DEFAULT_DIMENSIONS,
            learning_rate: DEFAULT_LEARNING_RATE,
            radius: DEFAULT_RADIUS,
            max_epochs: DEFAULT_MAX_EPOCHS,
            cluster_count: DEFAULT_CLUSTER_COUNT,
            kmeans_max_iterations: DEFAULT_KMEANS_MAX_ITERATIONS,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Total number of grid nodes.
    pub fn node_count(&self) -> usize {
        self.width * self.height
    }

    /// Rejects configurations the engine cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidGrid {
                width: self.width,
                height: self.height,
            });
        }
        if self.dimensions == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.cluster_count == 0 {
            return Err(ConfigError::InvalidClusterCount);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ConfigError::InvalidRadius(self.radius));
        }
        if self.kmeans_max_iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        Ok(())
    }

    /// Pretty TOML, as written by [`save_config_to`].
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> EngineConfig {
    let Some(data_dir) = app_data::app_data_dir() else {
        return EngineConfig::default();
    };
    load_config_from(&data_dir.join(CONFIG_FILENAME)).unwrap_or_default()
}

/// Load and validate config from an explicit file.
pub fn load_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
    let config: EngineConfig = toml::from_str(&s).map_err(ConfigError::Parse)?;
    config.validate()?;
    Ok(config)
}

/// Save config to the app data directory.
pub fn save_config(config: &EngineConfig) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(config, &data_dir.join(CONFIG_FILENAME))
}

/// Save config to an explicit file.
pub fn save_config_to(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    let s = config.to_toml()?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}


#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("grid dimensions must be positive, got {width}x{height}")]
    InvalidGrid { width: usize, height: usize },
    #[error("embedding dimensionality must be positive")]
    InvalidDimensions,
    #[error("cluster count must be positive")]
    InvalidClusterCount,
    #[error("learning rate must be finite and positive, got {0}")]
    InvalidLearningRate(f32),
    #[error("neighborhood radius must be finite and positive, got {0}")]
    InvalidRadius(f32),
    #[error("k-means iteration limit must be positive")]
    InvalidIterations,
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}
