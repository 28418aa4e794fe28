//! Runtime Configuration
//!
//! Loads [`RuntimeConfig`] from an optional TOML file with environment
//! variable overrides (`OTP_` prefix, `__` between nested keys):
//!
//! ```text
//! OTP_ISOLATION=in_context
//! OTP_POOL__MAX_IDLE=4
//! OTP_TIMEOUTS__CALL_MS=250
//! ```
//!
//! Every field has a default, so an empty file (or no file) is valid.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "OTP";

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub isolation: IsolationMode,
    pub pool: PoolConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

/// Execution unit pool sizing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Units provisioned when the runtime is created
    pub prewarm: usize,
    /// Idle units kept for reuse; extras are terminated on release
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prewarm: 0,
            max_idle: 64,
        }
    }
}

/// How execution units are provisioned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Probe the host; use dedicated threads when it supports them
    #[default]
    Auto,
    /// Always attempt a dedicated thread per unit
    Threads,
    /// Always run units on the caller's runtime
    InContext,
}

/// Deadlines applied by the runtime
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default deadline for `call_default`
    pub call_ms: u64,
    /// Deadline for a kill handshake before the unit is evicted
    pub kill_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: 5_000,
            kill_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn kill(&self) -> Duration {
        Duration::from_millis(self.kill_ms)
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Configuration that always uses the in-context fallback executor
    pub fn in_context() -> Self {
        Self {
            isolation: IsolationMode::InContext,
            ..Self::default()
        }
    }

    /// Load from an optional TOML file, then apply `OTP_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`RuntimeConfig::load`], reading overrides from `env` instead of the
    /// process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build runtime configuration")?
            .try_deserialize()
            .context("Failed to deserialize runtime configuration")?;

        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.pool.prewarm > self.pool.max_idle {
            bail!(
                "pool.prewarm ({}) exceeds pool.max_idle ({})",
                self.pool.prewarm,
                self.pool.max_idle
            );
        }
        if self.timeouts.call_ms == 0 {
            bail!("timeouts.call_ms must be greater than zero");
        }
        if self.timeouts.kill_ms == 0 {
            bail!("timeouts.kill_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn no_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    #[test]
    fn test_defaults_without_file() {
        let config = RuntimeConfig::load_with_env(None, no_env()).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.isolation, IsolationMode::Auto);
        assert_eq!(config.timeouts.call(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("runtime.toml");

        let config_content = r#"
isolation = "in_context"

[pool]
prewarm = 2
max_idle = 8

[timeouts]
call_ms = 250

[logging]
level = "debug"
json = true
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load_with_env(Some(&config_path), no_env()).unwrap();

        assert_eq!(config.isolation, IsolationMode::InContext);
        assert_eq!(config.pool.prewarm, 2);
        assert_eq!(config.pool.max_idle, 8);
        assert_eq!(config.timeouts.call_ms, 250);
        assert_eq!(config.timeouts.kill_ms, 5_000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_environment_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("runtime.toml");
        fs::write(&config_path, "[pool]\nmax_idle = 8\n").unwrap();

        let mut env = config::Map::new();
        env.insert("OTP_POOL__MAX_IDLE".to_string(), "3".to_string());
        env.insert("OTP_ISOLATION".to_string(), "threads".to_string());

        let config = RuntimeConfig::load_with_env(Some(&config_path), Some(env)).unwrap();
        assert_eq!(config.pool.max_idle, 3);
        assert_eq!(config.isolation, IsolationMode::Threads);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(RuntimeConfig::load_with_env(Some(&missing), no_env()).is_err());
    }

    #[test]
    fn test_validation_rejects_prewarm_above_max_idle() {
        let mut config = RuntimeConfig::default();
        config.pool.prewarm = 10;
        config.pool.max_idle = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool.prewarm"));
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let encoded = toml::to_string(&RuntimeConfig::in_context()).unwrap();
        assert!(encoded.contains("isolation = \"in_context\""));
    }
}
