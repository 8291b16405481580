//! Router and runtime configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;

use crate::error::ConfigError;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Request correlation and expiry settings.
    pub router: RouterConfig,
    #[serde(default)]
    /// Event loop pacing.
    pub runtime: RuntimeConfig,
}

/// Correlation table and ack queue settings.
///
/// A timeout of `0` disables expiry for that table.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RouterConfig {
    #[serde(default = "default_first_request_id")]
    pub first_request_id: i64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_stop_request_timeout_ms")]
    pub stop_request_timeout_ms: u64,
    #[serde(default = "default_volume_request_timeout_ms")]
    pub volume_request_timeout_ms: u64,
}

/// Event loop pacing for [`crate::cast_runtime::CastRuntime`].
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_idle_loop_sleep_ms")]
    pub idle_loop_sleep_ms: u64,
    #[serde(default = "default_expiry_sweep_interval_ms")]
    pub expiry_sweep_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            first_request_id: default_first_request_id(),
            request_timeout_ms: default_request_timeout_ms(),
            stop_request_timeout_ms: default_stop_request_timeout_ms(),
            volume_request_timeout_ms: default_volume_request_timeout_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_loop_sleep_ms: default_idle_loop_sleep_ms(),
            expiry_sweep_interval_ms: default_expiry_sweep_interval_ms(),
        }
    }
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.request_timeout_ms)
    }

    pub fn stop_request_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.stop_request_timeout_ms)
    }

    pub fn volume_request_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.volume_request_timeout_ms)
    }
}

impl RuntimeConfig {
    pub fn idle_loop_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_loop_sleep_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }
}

impl Config {
    /// Parses a config document; absent sections and fields take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config.sanitize())
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(
                "Config file not found. Using defaults. path={}",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Clamps values the router cannot honor.
    pub fn sanitize(mut self) -> Self {
        if self.router.first_request_id < 1 {
            self.router.first_request_id = 1;
        }
        if self.runtime.idle_loop_sleep_ms == 0 {
            self.runtime.idle_loop_sleep_ms = 1;
        }
        self
    }
}

/// Default location of the config file in the user's config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cast-relay").join("config.toml"))
}

fn timeout_from_ms(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

fn default_first_request_id() -> i64 {
    1
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_stop_request_timeout_ms() -> u64 {
    30_000
}

fn default_volume_request_timeout_ms() -> u64 {
    10_000
}

fn default_idle_loop_sleep_ms() -> u64 {
    25
}

fn default_expiry_sweep_interval_ms() -> u64 {
    500
}
