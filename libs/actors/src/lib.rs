//! Erlang/OTP-Style Process Runtime
//!
//! Spawn processes addressed by opaque [`Pid`]s, exchange messages with them,
//! race exchanges against timeouts, monitor termination, schedule delayed
//! delivery and multiplex sources through selectors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌─────────────────────────────┐
//! │         Runtime          │        │      Execution Unit         │
//! │                          │        │                             │
//! │  processes  Pid → unit ──┼─ cmd ─▶│  setup / run / kill         │
//! │  names      name ↔ Pid   │        │  (own thread, or fallback   │
//! │  timers     TimerRef     │        │   task on caller runtime)   │
//! │  monitors   MonitorRef   │        │             │               │
//! │  pool       idle units   │        │             ▼               │
//! │                          │◀─ exit─┼─ EventRouter                │
//! └──────────────────────────┘        │   correlated → call / kill  │
//!                                     │   fan-out    → selectors    │
//!                                     │   or mailbox → receive      │
//!                                     └─────────────────────────────┘
//! ```
//!
//! Behaviors are registered by name in a [`BehaviorRegistry`]; units only
//! ever receive the name plus data arguments.
//!
//! # Examples
//!
//! ```rust
//! use otp_actors::{BehaviorRegistry, Reply, Runtime};
//! use otp_config::RuntimeConfig;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let behaviors = BehaviorRegistry::new();
//! behaviors.register_fn("double", |_ctx, payload| async move {
//!     Reply::ok(payload.as_i64().unwrap_or(0) * 2)
//! });
//!
//! let runtime = Runtime::with_behaviors(RuntimeConfig::default(), behaviors)?;
//! let pid = runtime.start("double", json!(null))?;
//!
//! let reply = runtime.call(pid, json!(21), Duration::from_secs(1)).await?;
//! assert_eq!(reply, Ok(json!(42)));
//!
//! runtime.kill(pid).await?;
//! # Ok(())
//! # }
//! ```

pub mod behavior;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod registry;
pub mod router;
pub mod selector;
pub mod system;
pub mod task;
pub mod timer;
pub mod unit;

pub use behavior::{Behavior, BehaviorRegistry, ProcessContext, Reply};
pub use error::{Result, RuntimeError};
pub use monitor::Monitor;
pub use pool::PoolStats;
pub use router::SubscriptionId;
pub use selector::{ListenerId, Selector};
pub use system::{MetricsSnapshot, Runtime, RuntimeMetrics};
pub use task::{run_once, TaskError};
pub use unit::{OsThreads, ThreadHost, UnitKind};

pub use otp_types::{
    CallError, CancelResult, ExitMessage, ExitReason, MonitorRef, Pid, ProcessDown,
    RegistryError, Response, TimerRef,
};
