//! Configuration management (TOML)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub command: String,
    pub args: Vec<String>,
    pub shutdown_grace_ms: u64,
    pub frame_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
    pub bulk_timeout_ms: u64,
    pub per_window_timeout_ms: u64,
    pub max_windows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub cache_cleanup_cycles: u32,
    pub extra_app_patterns: Vec<String>,
    pub extra_background: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    pub broadcast_capacity: usize,
    /// Wait between SIGTERM and SIGKILL when ending a group.
    pub end_task_grace_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            command: "task_manager".to_string(),
            args: vec![],
            shutdown_grace_ms: 2000,
            frame_queue: 64,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            enabled: true,
            refresh_interval_secs: 10,
            bulk_timeout_ms: 2000,
            per_window_timeout_ms: 200,
            max_windows: 50,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            cache_cleanup_cycles: 30,
            extra_app_patterns: vec![],
            extra_background: vec![],
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig { socket_path: None, broadcast_capacity: 100, end_task_grace_ms: 300 }
    }
}

impl SourceConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl IpcConfig {
    pub fn end_task_grace(&self) -> Duration {
        Duration::from_millis(self.end_task_grace_ms)
    }
}

impl ResolverConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }

    pub fn per_window_timeout(&self) -> Duration {
        Duration::from_millis(self.per_window_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "procwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
