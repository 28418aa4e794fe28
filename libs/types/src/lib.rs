//! # OTP Runtime Types
//!
//! Shared vocabulary for the process runtime: identities, the message
//! contract between the runtime and an execution unit, and the typed
//! outcomes every runtime operation returns.
//!
//! ## Layout
//!
//! - [`ids`]: monotonically issued identities (`Pid`, `UnitId`,
//!   `CorrelationId`, `TimerRef`, `MonitorRef`)
//! - [`protocol`]: unit commands (`setup`/`run`/`kill`) and reply events
//! - [`exit`]: exit reasons and down notifications
//! - [`outcome`]: call, timer and registry outcomes
//!
//! ## Quick Start
//!
//! ```rust
//! use otp_types::{Command, Event, Pid};
//! use serde_json::json;
//!
//! let pid = Pid::next();
//! let run = Command::run(None, json!({"x": 1}));
//! assert!(matches!(run, Command::Run { .. }));
//!
//! let reply = Event::ok(None, json!(42));
//! assert_eq!(reply.status.into_response(), Some(Ok(json!(42))));
//! assert_ne!(pid, Pid::next());
//! ```

pub mod exit;
pub mod ids;
pub mod outcome;
pub mod protocol;

pub use exit::{ExitMessage, ExitReason, ProcessDown};
pub use ids::{CorrelationId, MonitorRef, Pid, TimerRef, UnitId};
pub use outcome::{CallError, CancelResult, RegistryError, UNSET_NAME};
pub use protocol::{BehaviorSpec, Command, Event, Response, Status};

/// Payload type carried by every message: plain data, never code.
pub use serde_json::Value;
