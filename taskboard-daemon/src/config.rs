//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use taskboard_events::{ClientConfig, QueueConfig, ReconnectPolicy};

/// Reconnection settings as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    pub max_attempts: u32,
    pub idle_retry_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_attempts: policy.max_attempts,
            idle_retry_ms: policy.idle_retry.as_millis() as u64,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            max_attempts: settings.max_attempts,
            idle_retry: Duration::from_millis(settings.idle_retry_ms),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path the config was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Socket path override (None = platform default)
    pub socket_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    pub log_level: String,

    /// Capacity of the shared broadcast queue
    pub broadcast_buffer: usize,

    /// Capacity of each client's outbound queue
    pub client_buffer: usize,

    /// How often `serve` logs a metrics snapshot (0 = never)
    pub metrics_log_interval_secs: u64,

    pub reconnect: ReconnectSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            config_path: PathBuf::new(),
            socket_path: None,
            log_level: "info".to_string(),
            broadcast_buffer: queue.broadcast_buffer,
            client_buffer: queue.client_buffer,
            metrics_log_interval_secs: 60,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        let config_path = taskboard_paths::get_daemon_config_path()
            .context("Failed to resolve config path")?;
        Self::load_from(config_path)
    }

    /// Load configuration from `path`, writing defaults there if missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref().to_path_buf();

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: DaemonConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save().context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to `config_path`
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Queue sizes from the file, overridden by the environment
    pub fn queue_config(&self) -> QueueConfig {
        self.queue_config_with(|key| std::env::var(key).ok())
    }

    pub fn queue_config_with<F>(&self, lookup: F) -> QueueConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        QueueConfig {
            broadcast_buffer: self.broadcast_buffer,
            client_buffer: self.client_buffer,
        }
        .with_overrides(lookup)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectPolicy::from(&self.reconnect),
            ..ClientConfig::default()
        }
    }

    /// Socket to use: explicit argument, then `TASKBOARD_SOCKET`, then the
    /// file's override, then the platform default
    pub fn resolve_socket_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        self.resolve_socket_path_with(explicit, |key| std::env::var(key).ok())
    }

    pub fn resolve_socket_path_with<F>(&self, explicit: Option<PathBuf>, lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if lookup(taskboard_paths::SOCKET_ENV_VAR).is_none() {
            if let Some(path) = &self.socket_path {
                return Ok(path.clone());
            }
        }
        taskboard_paths::socket_path_from(lookup)
    }

    pub fn metrics_log_interval(&self) -> Option<Duration> {
        match self.metrics_log_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("daemon.toml");

        let config = DaemonConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.broadcast_buffer, 256);
        assert_eq!(config.client_buffer, 64);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemon.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\nclient_buffer = 8\n\n[reconnect]\nmax_attempts = 3\n",
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.client_buffer, 8);
        assert_eq!(config.broadcast_buffer, 256);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 250);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemon.toml");
        std::fs::write(&path, "client_buffer = \"lots\"").unwrap();

        assert!(DaemonConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let temp = tempdir().unwrap();
        let mut config = DaemonConfig {
            config_path: temp.path().join("daemon.toml"),
            ..DaemonConfig::default()
        };
        config.socket_path = Some(PathBuf::from("/tmp/board.sock"));
        config.metrics_log_interval_secs = 0;
        config.save().unwrap();

        let loaded = DaemonConfig::load_from(&config.config_path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.metrics_log_interval(), None);
    }

    #[test]
    fn test_environment_overrides_queue_sizes() {
        let config = DaemonConfig {
            broadcast_buffer: 32,
            client_buffer: 16,
            ..DaemonConfig::default()
        };
        let env: HashMap<&str, &str> = [("TASKBOARD_CLIENT_BUFFER", "4")].into_iter().collect();

        let queue = config.queue_config_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(queue.broadcast_buffer, 32);
        assert_eq!(queue.client_buffer, 4);
    }

    #[test]
    fn test_socket_path_precedence() {
        let config = DaemonConfig {
            socket_path: Some(PathBuf::from("/from/file.sock")),
            ..DaemonConfig::default()
        };

        let explicit = config
            .resolve_socket_path_with(Some(PathBuf::from("/explicit.sock")), no_env)
            .unwrap();
        assert_eq!(explicit, PathBuf::from("/explicit.sock"));

        let from_env = config
            .resolve_socket_path_with(None, |key| {
                (key == taskboard_paths::SOCKET_ENV_VAR).then(|| "/from/env.sock".to_string())
            })
            .unwrap();
        assert_eq!(from_env, PathBuf::from("/from/env.sock"));

        let from_file = config.resolve_socket_path_with(None, no_env).unwrap();
        assert_eq!(from_file, PathBuf::from("/from/file.sock"));
    }

    #[test]
    fn test_reconnect_settings_convert() {
        let settings = ReconnectSettings {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 3,
            max_attempts: 4,
            idle_retry_ms: 2_000,
        };
        let policy = ReconnectPolicy::from(&settings);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.idle_retry, Duration::from_secs(2));
    }
}
