//! Runtime Error Types
//!
//! Failures surfaced by runtime operations. Registry, timer and `try_call`
//! outcomes are typed values from `otp_types` and never appear here; of the
//! variants below only [`RuntimeError::ProcessPresumedDead`] is meant to be
//! propagated as unrecoverable.

use otp_types::{ExitReason, Pid};
use std::time::Duration;
use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// The Pid does not map to a live process
    #[error("No process: {pid}")]
    NoProcess { pid: Pid },

    /// No behavior is registered under this name
    #[error("Unknown behavior: {name}")]
    UnknownBehavior { name: String },

    /// A `call` got no reply in time; the callee is not killed
    #[error("Process {pid} presumed dead: no reply within {timeout_ms}ms")]
    ProcessPresumedDead { pid: Pid, timeout_ms: u64 },

    /// A `receive` got no message in time
    #[error("Receive from {pid} timed out after {timeout_ms}ms")]
    ReceiveTimeout { pid: Pid, timeout_ms: u64 },

    /// The callee exited before answering
    #[error("Process {pid} exited before replying: {reason}")]
    CalleeExited { pid: Pid, reason: ExitReason },

    /// The kill handshake was not acknowledged; the unit was evicted
    #[error("Kill of {pid} not acknowledged within {timeout_ms}ms")]
    KillTimeout { pid: Pid, timeout_ms: u64 },

    /// No execution unit could be provisioned
    #[error("Provisioning error: {message}")]
    Provisioning { message: String },

    /// Operation needs a tokio runtime and none is running
    #[error("Runtime unavailable: {message}")]
    Unavailable { message: String },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn no_process(pid: Pid) -> Self {
        Self::NoProcess { pid }
    }

    pub fn unknown_behavior(name: impl Into<String>) -> Self {
        Self::UnknownBehavior { name: name.into() }
    }

    pub fn process_presumed_dead(pid: Pid, timeout: Duration) -> Self {
        Self::ProcessPresumedDead {
            pid,
            timeout_ms: millis(timeout),
        }
    }

    pub fn receive_timeout(pid: Pid, timeout: Duration) -> Self {
        Self::ReceiveTimeout {
            pid,
            timeout_ms: millis(timeout),
        }
    }

    pub fn callee_exited(pid: Pid, reason: ExitReason) -> Self {
        Self::CalleeExited { pid, reason }
    }

    pub fn kill_timeout(pid: Pid, timeout: Duration) -> Self {
        Self::KillTimeout {
            pid,
            timeout_ms: millis(timeout),
        }
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Short category name for log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoProcess { .. } => "no_process",
            Self::UnknownBehavior { .. } => "unknown_behavior",
            Self::ProcessPresumedDead { .. } => "call_timeout",
            Self::ReceiveTimeout { .. } => "receive_timeout",
            Self::CalleeExited { .. } => "callee_exited",
            Self::KillTimeout { .. } => "kill_timeout",
            Self::Provisioning { .. } => "provisioning",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Whole milliseconds, saturating for durations past `u64::MAX` ms
fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let pid = Pid::next();
        let err = RuntimeError::process_presumed_dead(pid, Duration::from_millis(50));
        assert_eq!(
            err.to_string(),
            format!("Process {} presumed dead: no reply within 50ms", pid)
        );
        assert_eq!(err.category(), "call_timeout");

        let exited = RuntimeError::callee_exited(pid, ExitReason::Normal);
        assert!(exited.to_string().ends_with("normal"));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let pid = Pid::next();
        assert_eq!(
            RuntimeError::kill_timeout(pid, Duration::MAX),
            RuntimeError::KillTimeout {
                pid,
                timeout_ms: u64::MAX
            }
        );
        assert_eq!(
            RuntimeError::receive_timeout(pid, Duration::from_millis(7)),
            RuntimeError::ReceiveTimeout { pid, timeout_ms: 7 }
        );
    }
}
