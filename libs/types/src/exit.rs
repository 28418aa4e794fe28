//! Exit reasons and termination notices

use crate::ids::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a process stopped
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The behavior asked to stop
    Normal,
    /// A kill handshake completed, or the unit was torn down by force
    Killed,
    /// The execution unit faulted
    Abnormal(String),
}

impl ExitReason {
    pub fn abnormal(detail: impl Into<String>) -> Self {
        ExitReason::Abnormal(detail.into())
    }

    /// Reason reported for a Pid that was never alive or already gone
    pub fn noproc() -> Self {
        ExitReason::abnormal("noproc")
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, ExitReason::Abnormal(_))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::Abnormal(detail) => write!(f, "abnormal: {}", detail),
        }
    }
}

/// Notice that a process exited, raised by its execution unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitMessage {
    pub pid: Pid,
    pub reason: ExitReason,
}

impl ExitMessage {
    pub fn new(pid: Pid, reason: ExitReason) -> Self {
        Self { pid, reason }
    }
}

/// Resolution of a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDown {
    pub pid: Pid,
    pub reason: ExitReason,
}

impl From<ExitMessage> for ProcessDown {
    fn from(exit: ExitMessage) -> Self {
        Self {
            pid: exit.pid,
            reason: exit.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::Killed.to_string(), "killed");
        assert_eq!(ExitReason::abnormal("boom").to_string(), "abnormal: boom");
        assert!(ExitReason::noproc().is_abnormal());
    }

    #[test]
    fn test_process_down_from_exit() {
        let pid = Pid::next();
        let down = ProcessDown::from(ExitMessage::new(pid, ExitReason::Killed));
        assert_eq!(down.pid, pid);
        assert_eq!(down.reason, ExitReason::Killed);
    }
}
