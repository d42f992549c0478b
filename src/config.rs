//! Configuration for the session telemetry agent.

use crate::core::export::DEFAULT_DELIMITER;
use crate::core::sampler::DEFAULT_SAMPLE_PERIOD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Recompute derived telemetry every this many ticks by default.
pub const DEFAULT_DERIVE_EVERY_TICKS: u32 = 5;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time between samples
    #[serde(with = "duration_ms_serde")]
    pub sample_period: Duration,

    /// Ticks between derived telemetry recomputations (minimum 1)
    pub derive_every_ticks: u32,

    /// Which signal categories to read
    pub sources: SourceConfig,

    /// Directory for exported sessions
    pub export_path: PathBuf,

    /// Directory for the transparency log
    pub data_path: PathBuf,

    /// Field delimiter for the delimited-text export
    pub delimiter: char,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("session-telemetry-agent");

        Self {
            sample_period: DEFAULT_SAMPLE_PERIOD,
            derive_every_ticks: DEFAULT_DERIVE_EVERY_TICKS,
            sources: SourceConfig::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("session-telemetry-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Clamp values that would stall the sampler.
    pub fn normalized(mut self) -> Self {
        self.derive_every_ticks = self.derive_every_ticks.max(1);
        if self.sample_period.is_zero() {
            self.sample_period = DEFAULT_SAMPLE_PERIOD;
        }
        self
    }
}

/// Which signal categories to read. Disabled categories are recorded as
/// unavailable on every sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub network: bool,
    pub memory: bool,
    pub activity: bool,
    pub battery: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            network: true,
            memory: true,
            activity: true,
            battery: true,
        }
    }
}

impl SourceConfig {
    /// Parse source configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sources: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let has = |name: &str| sources.iter().any(|s| s == name || s == "all");

        Self {
            network: has("network"),
            memory: has("memory"),
            activity: has("activity"),
            battery: has("battery"),
        }
    }

    /// Check if at least one source is enabled.
    pub fn any_enabled(&self) -> bool {
        self.network || self.memory || self.activity || self.battery
    }

    /// Enabled category names, for display.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        [
            ("network", self.network),
            ("memory", self.memory),
            ("activity", self.activity),
            ("battery", self.battery),
        ]
        .into_iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_parsing() {
        let config = SourceConfig::from_csv("network, Memory");
        assert!(config.network);
        assert!(config.memory);
        assert!(!config.activity);
        assert!(!config.battery);

        let config = SourceConfig::from_csv("all");
        assert!(config.network && config.memory && config.activity && config.battery);

        let config = SourceConfig::from_csv("bogus");
        assert!(!config.any_enabled());
        assert!(config.enabled_names().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sample_period, Duration::from_millis(5000));
        assert_eq!(config.derive_every_ticks, 5);
        assert_eq!(config.delimiter, ',');
        assert!(config.sources.any_enabled());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.sample_period = Duration::from_millis(250);
        config.sources = SourceConfig::from_csv("network");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sample_period, Duration::from_millis(250));
        assert!(loaded.sources.network);
        assert!(!loaded.sources.battery);
    }

    #[test]
    fn test_missing_file_yields_defaults_and_zero_values_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.derive_every_ticks, DEFAULT_DERIVE_EVERY_TICKS);

        let path = dir.path().join("zero.json");
        std::fs::write(&path, r#"{"sample_period": 0, "derive_every_ticks": 0}"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.derive_every_ticks, 1);
        assert_eq!(config.sample_period, DEFAULT_SAMPLE_PERIOD);
    }
}
