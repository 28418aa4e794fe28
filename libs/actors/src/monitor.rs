//! Process Monitors
//!
//! A monitor is a one-shot notification of a process's termination,
//! independent of any reply channel. It stays in the active set until it
//! resolves or is demonitored. Demonitoring suppresses selector fan-out for
//! that monitor, but the monitor's own future still settles when the process
//! dies.

use otp_types::{ExitReason, MonitorRef, Pid, ProcessDown};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;
use tracing::trace;

type Tap = Box<dyn FnOnce(&ProcessDown) + Send>;

/// Termination watch on one process
#[derive(Debug)]
pub struct Monitor {
    reference: MonitorRef,
    pid: Pid,
    down: oneshot::Receiver<ProcessDown>,
}

impl Monitor {
    pub fn reference(&self) -> MonitorRef {
        self.reference
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wait for the process to terminate. `None` only if the runtime was
    /// dropped first.
    pub async fn down(self) -> Option<ProcessDown> {
        self.down.await.ok()
    }

    /// Non-blocking check for termination
    pub fn try_down(&mut self) -> Option<ProcessDown> {
        self.down.try_recv().ok()
    }
}

struct Watch {
    reference: MonitorRef,
    notify: oneshot::Sender<ProcessDown>,
    taps: Vec<Tap>,
}

#[derive(Default)]
struct Monitors {
    active: HashSet<MonitorRef>,
    owners: HashMap<MonitorRef, Pid>,
    watches: HashMap<Pid, Vec<Watch>>,
}

/// Active monitor set
#[derive(Default)]
pub struct MonitorSet {
    monitors: Mutex<Monitors>,
}

impl std::fmt::Debug for MonitorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSet")
            .field("active", &self.active_count())
            .finish()
    }
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `pid`. A process that is not alive resolves immediately with
    /// `noproc` and never enters the active set.
    pub fn establish(&self, pid: Pid, alive: bool) -> Monitor {
        let reference = MonitorRef::next();
        let (tx, rx) = oneshot::channel();

        if alive {
            let mut monitors = self.monitors.lock();
            monitors.active.insert(reference);
            monitors.owners.insert(reference, pid);
            monitors.watches.entry(pid).or_default().push(Watch {
                reference,
                notify: tx,
                taps: Vec::new(),
            });
        } else {
            let _ = tx.send(ProcessDown {
                pid,
                reason: ExitReason::noproc(),
            });
        }

        trace!(pid = %pid, monitor = %reference, alive, "Monitor established");
        Monitor {
            reference,
            pid,
            down: rx,
        }
    }

    /// Remove a monitor from the active set; `false` if it already resolved
    /// or was demonitored
    pub fn demonitor(&self, reference: MonitorRef) -> bool {
        let mut monitors = self.monitors.lock();
        if !monitors.active.remove(&reference) {
            return false;
        }
        if let Some(pid) = monitors.owners.get(&reference).copied() {
            if let Some(watch) = monitors
                .watches
                .get_mut(&pid)
                .and_then(|watches| watches.iter_mut().find(|w| w.reference == reference))
            {
                watch.taps.clear();
            }
        }
        true
    }

    pub fn is_active(&self, reference: MonitorRef) -> bool {
        self.monitors.lock().active.contains(&reference)
    }

    pub fn active_count(&self) -> usize {
        self.monitors.lock().active.len()
    }

    /// Run `tap` on resolution, if the monitor is still active by then.
    /// `false` if the monitor is no longer active.
    pub fn tap(
        &self,
        reference: MonitorRef,
        tap: impl FnOnce(&ProcessDown) + Send + 'static,
    ) -> bool {
        let mut monitors = self.monitors.lock();
        if !monitors.active.contains(&reference) {
            return false;
        }
        let Some(pid) = monitors.owners.get(&reference).copied() else {
            return false;
        };
        match monitors
            .watches
            .get_mut(&pid)
            .and_then(|watches| watches.iter_mut().find(|w| w.reference == reference))
        {
            Some(watch) => {
                watch.taps.push(Box::new(tap));
                true
            }
            None => false,
        }
    }

    /// Resolve every monitor on `pid`; returns how many were resolved
    pub fn notify(&self, pid: Pid, reason: &ExitReason) -> usize {
        let resolved: Vec<(Watch, bool)> = {
            let mut monitors = self.monitors.lock();
            let watches = monitors.watches.remove(&pid).unwrap_or_default();
            watches
                .into_iter()
                .map(|watch| {
                    monitors.owners.remove(&watch.reference);
                    let active = monitors.active.remove(&watch.reference);
                    (watch, active)
                })
                .collect()
        };

        let count = resolved.len();
        for (watch, active) in resolved {
            let down = ProcessDown {
                pid,
                reason: reason.clone(),
            };
            if active {
                for tap in watch.taps {
                    tap(&down);
                }
            }
            let _ = watch.notify.send(down);
        }
        count
    }
}
