//! BitGuard Configuration Module
//! Handles loading and validating bitguard.config.json

use crate::engine::anomaly::ClassifierBackend;
use crate::engine::monitor::MonitorPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "bitguard.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Partial-reconfiguration region identifier.
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_latency_base_ms")]
    pub latency_base_ms: u64,
    #[serde(default = "default_latency_jitter_ms")]
    pub latency_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Trust anchor for bitstream signatures.
    #[serde(default = "default_public_key")]
    pub public_key: PathBuf,
    /// Rollback target. Must be a known-good, signed image.
    #[serde(default = "default_safe_image")]
    pub safe_image: PathBuf,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_baseline_samples")]
    pub baseline_samples: usize,
    #[serde(default)]
    pub classifier: ClassifierBackend,
    #[serde(default)]
    pub policy: MonitorPolicy,
}

fn default_region() -> String {
    "PR0".to_string()
}

fn default_latency_base_ms() -> u64 {
    1000
}

fn default_latency_jitter_ms() -> u64 {
    800
}

fn default_public_key() -> PathBuf {
    PathBuf::from("data/public.key")
}

fn default_safe_image() -> PathBuf {
    PathBuf::from("data/safe_module.bit")
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_baseline_samples() -> usize {
    120
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            latency_base_ms: default_latency_base_ms(),
            latency_jitter_ms: default_latency_jitter_ms(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            public_key: default_public_key(),
            safe_image: default_safe_image(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            baseline_samples: default_baseline_samples(),
            classifier: ClassifierBackend::default(),
            policy: MonitorPolicy::default(),
        }
    }
}

impl DeviceConfig {
    pub fn latency_base(&self) -> Duration {
        Duration::from_millis(self.latency_base_ms)
    }

    pub fn latency_jitter(&self) -> Duration {
        Duration::from_millis(self.latency_jitter_ms)
    }
}

impl ControllerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load config, falling back to defaults when the file is absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        match Self::load(project_dir) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device.region, "PR0");
        assert_eq!(config.monitor.baseline_samples, 120);
        assert_eq!(config.monitor.classifier, ClassifierBackend::ZScore);
        assert_eq!(config.monitor.policy, MonitorPolicy::StopAfterRollback);
        assert_eq!(config.controller.settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.device.region = "PR1".to_string();
        config.monitor.classifier = ClassifierBackend::Robust;
        config.monitor.policy = MonitorPolicy::ResumeAfterRollback;
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.device.region, "PR1");
        assert_eq!(loaded.monitor.classifier, ClassifierBackend::Robust);
        assert_eq!(loaded.monitor.policy, MonitorPolicy::ResumeAfterRollback);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::NotFound(_))
        ));
        assert!(Config::load_or_default(dir.path()).is_ok());
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.monitor.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_unknown_classifier_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"monitor":{"classifier":"quantum"}}"#,
        )
        .unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
