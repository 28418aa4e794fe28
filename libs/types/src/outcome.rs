//! Typed outcomes
//!
//! Registration, call and timer operations never raise: each returns one of
//! these values.

use crate::ids::Pid;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Literal placeholder for an unset name; never a valid registration
pub const UNSET_NAME: &str = "undefined";

/// Failure of a `try_call`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The callee answered with an error status, or is gone
    #[error("Callee down: {reason}")]
    CalleeDown { reason: Value },

    /// No reply arrived within the deadline
    #[error("Call timed out")]
    CallTimeout,
}

impl CallError {
    pub fn callee_down(reason: impl Into<Value>) -> Self {
        CallError::CalleeDown {
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::CallTimeout)
    }
}

/// Result of cancelling a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// The timer had not fired; it never will
    Cancelled { time_remaining: Duration },
    /// Already fired or already cancelled
    TimerNotFound,
}

impl CancelResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancelResult::Cancelled { .. })
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        match self {
            CancelResult::Cancelled { time_remaining } => Some(*time_remaining),
            CancelResult::TimerNotFound => None,
        }
    }
}

/// Failure of a name registry operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Process {0} is not alive")]
    InactiveProcess(Pid),

    #[error("Name '{0}' is already registered")]
    NameAlreadyTaken(String),

    #[error("Process {pid} is already registered as '{name}'")]
    ProcessAlreadyRegistered { pid: Pid, name: String },

    #[error("Invalid name: '{0}'")]
    InvalidName(String),

    #[error("Name '{0}' is not registered")]
    NotRegistered(String),
}
