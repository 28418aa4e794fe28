//! Name Registry
//!
//! Bidirectional name ↔ Pid map. A name maps to exactly one Pid and a Pid
//! holds at most one name. Liveness is owned by the runtime, which passes it
//! in under its process-table lock so a name is never attached to a process
//! that is concurrently exiting.

use otp_types::{Pid, RegistryError, UNSET_NAME};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Names {
    by_name: HashMap<String, Pid>,
    by_pid: HashMap<Pid, String>,
}

/// Registered process names
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: Mutex<Names>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `name` to `pid`.
    ///
    /// Failures are checked in order: inactive process, name taken, process
    /// already named, invalid name.
    pub fn register(&self, pid: Pid, name: &str, alive: bool) -> Result<(), RegistryError> {
        if !alive {
            return Err(RegistryError::InactiveProcess(pid));
        }

        let mut names = self.names.lock();
        if names.by_name.contains_key(name) {
            return Err(RegistryError::NameAlreadyTaken(name.to_string()));
        }
        if let Some(existing) = names.by_pid.get(&pid) {
            return Err(RegistryError::ProcessAlreadyRegistered {
                pid,
                name: existing.clone(),
            });
        }
        if name.is_empty() || name == UNSET_NAME {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        names.by_name.insert(name.to_string(), pid);
        names.by_pid.insert(pid, name.to_string());
        debug!(pid = %pid, name = %name, "Registered process name");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<Pid, RegistryError> {
        let mut names = self.names.lock();
        let pid = names
            .by_name
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        names.by_pid.remove(&pid);
        debug!(pid = %pid, name = %name, "Unregistered process name");
        Ok(pid)
    }

    pub fn named(&self, name: &str) -> Option<Pid> {
        self.names.lock().by_name.get(name).copied()
    }

    pub fn name_of(&self, pid: Pid) -> Option<String> {
        self.names.lock().by_pid.get(&pid).cloned()
    }

    /// All registered names, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.lock().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop whatever name `pid` held; called when the process exits
    pub fn release_pid(&self, pid: Pid) -> Option<String> {
        let mut names = self.names.lock();
        let name = names.by_pid.remove(&pid)?;
        names.by_name.remove(&name);
        Some(name)
    }

    pub fn clear(&self) {
        let mut names = self.names.lock();
        names.by_name.clear();
        names.by_pid.clear();
    }
}
