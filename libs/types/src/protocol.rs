//! Execution Unit Protocol
//!
//! The contract between the runtime and an execution unit: three inbound
//! commands and one outbound event shape.
//!
//! ```text
//! runtime ──setup{identity, behavior}──▶ unit          (no reply)
//! runtime ──run{correlation?, payload}─▶ unit ──▶ {status: ok|error|done}
//! runtime ──kill{correlation}──────────▶ unit ──▶ {status: done}
//! runtime ──<anything else>────────────▶ unit ──▶ {status: error, "Invalid command"}
//! ```
//!
//! Units receive a [`BehaviorSpec`] naming a statically registered behavior
//! plus its data arguments, never executable code.

use crate::ids::{CorrelationId, Pid};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A reply as observed by a caller: `Ok(value)` or `Err(error detail)`
pub type Response = Result<Value, Value>;

/// Reference to a registered behavior plus its setup arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSpec {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl BehaviorSpec {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Inbound command for an execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Bind the unit to a Pid and instantiate the behavior
    Setup { identity: Pid, behavior: BehaviorSpec },
    /// Invoke the bound behavior with `payload`
    Run {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation: Option<CorrelationId>,
        payload: Value,
    },
    /// Discard bound behavior and state, then acknowledge with `done`
    Kill { correlation: CorrelationId },
    /// Anything the unit does not understand
    #[serde(other)]
    Unrecognized,
}

impl Command {
    pub fn setup(identity: Pid, behavior: BehaviorSpec) -> Self {
        Command::Setup { identity, behavior }
    }

    pub fn run(correlation: Option<CorrelationId>, payload: Value) -> Self {
        Command::Run {
            correlation,
            payload,
        }
    }

    pub fn kill(correlation: CorrelationId) -> Self {
        Command::Kill { correlation }
    }

    /// Short name used in log fields
    pub fn name(&self) -> &'static str {
        match self {
            Command::Setup { .. } => "setup",
            Command::Run { .. } => "run",
            Command::Kill { .. } => "kill",
            Command::Unrecognized => "unrecognized",
        }
    }
}

/// Outcome status carried by a unit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Ok { value: Value },
    Error { error: Value },
    Done,
}

impl Status {
    /// `Ok`/`Error` as a [`Response`]; `Done` carries no reply
    pub fn into_response(self) -> Option<Response> {
        match self {
            Status::Ok { value } => Some(Ok(value)),
            Status::Error { error } => Some(Err(error)),
            Status::Done => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Status::Done)
    }
}

/// Outbound event emitted by an execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Echo of the request's correlation token, if it had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationId>,
    #[serde(flatten)]
    pub status: Status,
}

impl Event {
    pub fn ok(correlation: Option<CorrelationId>, value: Value) -> Self {
        Self {
            correlation,
            status: Status::Ok { value },
        }
    }

    pub fn error(correlation: Option<CorrelationId>, error: Value) -> Self {
        Self {
            correlation,
            status: Status::Error { error },
        }
    }

    pub fn done(correlation: Option<CorrelationId>) -> Self {
        Self {
            correlation,
            status: Status::Done,
        }
    }

    /// Reply to a command the unit cannot act on
    pub fn invalid_command(correlation: Option<CorrelationId>) -> Self {
        Self::error(correlation, json!({ "message": "Invalid command" }))
    }
}
