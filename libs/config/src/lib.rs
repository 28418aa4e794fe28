//! # OTP Runtime Configuration
//!
//! Configuration for the process runtime: pool sizing, isolation mode,
//! call/kill deadlines and logging, plus the tracing subscriber setup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use otp_config::{init_tracing, RuntimeConfig};
//! use std::path::Path;
//!
//! let config = RuntimeConfig::load(Some(Path::new("config/runtime.toml")))?;
//! init_tracing(&config.logging)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod logging;
pub mod runtime_config;

pub use logging::init_tracing;
pub use runtime_config::{
    IsolationMode, LoggingConfig, PoolConfig, RuntimeConfig, TimeoutConfig, ENV_PREFIX,
};
