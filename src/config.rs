use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::StrideError;

const CONFIG_DIR_NAME: &str = "stride";
const CONFIG_FILE_NAME: &str = "config.json";

pub const TICK_INTERVAL_MS: u64 = 50;
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 5000;
pub const MIN_SAMPLE_DISTANCE_M: f64 = 5.0;

/// How often the position source should report, forwarded with every subscription.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: MIN_SAMPLE_INTERVAL_MS,
            min_distance_m: MIN_SAMPLE_DISTANCE_M,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub channel_id: String,
    pub title: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            channel_id: "tracking_channel".to_string(),
            title: "Running App".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub tick_interval_ms: u64,
    pub sampling: SamplingConfig,
    pub status: StatusConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            sampling: SamplingConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Loads the config from the platform config directory. Returns `Ok(None)` when
    /// no config file has been saved yet.
    pub fn from_local_file() -> Result<Option<Self>, StrideError> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(None);
        };
        let config_path = config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Self::from_file(&config_path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, StrideError> {
        let file =
            std::fs::File::open(path).map_err(|e| StrideError::ConfigIOError { source: e })?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| StrideError::ConfigSerializeError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), StrideError> {
        let config_path = dirs::config_dir()
            .ok_or(StrideError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME);
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), StrideError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StrideError::ConfigIOError { source: e })?;
            }
        }

        let file =
            std::fs::File::create(path).map_err(|e| StrideError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| StrideError::ConfigSerializeError { source: e })
    }

    pub fn validate(&self) -> Result<(), StrideError> {
        if self.tick_interval_ms == 0 {
            return Err(StrideError::InvalidConfig {
                field: "tick_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.tick_interval_ms >= 1000 {
            return Err(StrideError::InvalidConfig {
                field: "tick_interval_ms".to_string(),
                reason: format!(
                    "{}ms is too coarse to report every second",
                    self.tick_interval_ms
                ),
            });
        }
        if !self.sampling.min_distance_m.is_finite() || self.sampling.min_distance_m < 0.0 {
            return Err(StrideError::InvalidConfig {
                field: "sampling.min_distance_m".to_string(),
                reason: "must be a non-negative number of meters".to_string(),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.status.channel_id, "tracking_channel");
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "tick_interval_ms": 20, "status": { "title": "Evening run" } }"#)
            .unwrap();

        let config = TrackerConfig::from_file(&path).unwrap();
        assert_eq!(config.tick_interval_ms, 20);
        assert_eq!(config.status.title, "Evening run");
        assert_eq!(config.status.channel_id, "tracking_channel");
        assert_eq!(config.sampling, SamplingConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        let config = TrackerConfig {
            tick_interval_ms: 25,
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(TrackerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_tick_interval() {
        for tick_interval_ms in [0, 1000, 5000] {
            let config = TrackerConfig {
                tick_interval_ms,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(StrideError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_negative_distance() {
        let mut config = TrackerConfig::default();
        config.sampling.min_distance_m = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TrackerConfig::from_file(&path),
            Err(StrideError::ConfigSerializeError { .. })
        ));
    }
}
