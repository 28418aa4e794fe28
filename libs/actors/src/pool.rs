//! Execution Unit Pool
//!
//! Idle units are reused for new processes. A unit goes back to the pool only
//! after a clean exit (kill acknowledged, or behavior stop) and only once;
//! faulted or abandoned units are terminated instead.
//!
//! Provisioning tries an isolated unit first when the isolation mode and the
//! host allow it, and silently falls back to the in-context executor when
//! that fails.

use crate::behavior::BehaviorRegistry;
use crate::error::Result;
use crate::router::ExitHook;
use crate::unit::{ExecutionUnit, ThreadHost, UnitKind};
use otp_config::IsolationMode;
use otp_types::UnitId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pool statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Units currently idle
    pub idle: usize,
    /// Units provisioned on dedicated threads
    pub isolated_provisioned: u64,
    /// Units provisioned on the caller's runtime
    pub in_context_provisioned: u64,
    /// Isolated provisioning attempts that fell back
    pub fallbacks: u64,
    /// Acquisitions served from the idle set
    pub reused: u64,
    /// Units torn down after a fault or abandonment
    pub evicted: u64,
    /// Clean units terminated because the idle set was full
    pub retired: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    isolated_provisioned: AtomicU64,
    in_context_provisioned: AtomicU64,
    fallbacks: AtomicU64,
    reused: AtomicU64,
    evicted: AtomicU64,
    retired: AtomicU64,
}

pub(crate) struct UnitPool {
    idle: Mutex<Vec<Arc<ExecutionUnit>>>,
    behaviors: BehaviorRegistry,
    exit_hook: ExitHook,
    isolation: IsolationMode,
    host: Arc<dyn ThreadHost>,
    max_idle: usize,
    counters: PoolCounters,
}

impl fmt::Debug for UnitPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitPool")
            .field("idle", &self.idle_count())
            .field("isolation", &self.isolation)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl UnitPool {
    pub fn new(
        behaviors: BehaviorRegistry,
        exit_hook: ExitHook,
        isolation: IsolationMode,
        host: Arc<dyn ThreadHost>,
        max_idle: usize,
    ) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            behaviors,
            exit_hook,
            isolation,
            host,
            max_idle,
            counters: PoolCounters::default(),
        }
    }

    /// Pop an idle unit, or provision a new one
    pub fn acquire(&self) -> Result<Arc<ExecutionUnit>> {
        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(unit) if unit.is_open() => {
                    self.counters.reused.fetch_add(1, Ordering::Relaxed);
                    debug!(unit_id = %unit.id(), "Reusing idle execution unit");
                    return Ok(unit);
                }
                Some(unit) => {
                    debug!(unit_id = %unit.id(), "Discarding closed idle unit");
                    unit.terminate();
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                }
                None => return self.provision(),
            }
        }
    }

    fn provision(&self) -> Result<Arc<ExecutionUnit>> {
        let try_isolated = match self.isolation {
            IsolationMode::Auto => self.host.available(),
            IsolationMode::Threads => true,
            IsolationMode::InContext => false,
        };

        if try_isolated {
            match ExecutionUnit::spawn_isolated(
                self.host.as_ref(),
                self.behaviors.clone(),
                Arc::clone(&self.exit_hook),
            ) {
                Ok(unit) => {
                    self.counters
                        .isolated_provisioned
                        .fetch_add(1, Ordering::Relaxed);
                    return Ok(unit);
                }
                Err(error) => {
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %error, "Isolated unit unavailable, using in-context executor");
                }
            }
        }

        let unit =
            ExecutionUnit::spawn_in_context(self.behaviors.clone(), Arc::clone(&self.exit_hook))?;
        self.counters
            .in_context_provisioned
            .fetch_add(1, Ordering::Relaxed);
        Ok(unit)
    }

    /// Return a cleanly exited unit. Re-releasing a unit already idle is a
    /// no-op.
    pub fn release(&self, unit: Arc<ExecutionUnit>) {
        if !unit.is_open() {
            self.evict(&unit);
            return;
        }

        let mut idle = self.idle.lock();
        if idle.iter().any(|existing| existing.id() == unit.id()) {
            return;
        }
        if idle.len() >= self.max_idle {
            drop(idle);
            unit.terminate();
            self.counters.retired.fetch_add(1, Ordering::Relaxed);
            debug!(unit_id = %unit.id(), "Idle pool full, retiring unit");
            return;
        }
        debug!(unit_id = %unit.id(), kind = ?unit.kind(), "Unit returned to idle pool");
        idle.push(unit);
    }

    /// Tear a unit down; it is never handed out again
    pub fn evict(&self, unit: &ExecutionUnit) {
        self.idle.lock().retain(|existing| existing.id() != unit.id());
        unit.terminate();
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        debug!(unit_id = %unit.id(), "Execution unit evicted");
    }

    /// Evict an idle unit known only by id (a fault with no process bound)
    pub fn evict_idle(&self, id: UnitId) -> bool {
        let unit = {
            let mut idle = self.idle.lock();
            let position = idle.iter().position(|existing| existing.id() == id);
            position.map(|index| idle.swap_remove(index))
        };
        match unit {
            Some(unit) => {
                self.evict(&unit);
                true
            }
            None => false,
        }
    }

    /// Provision `count` units straight into the idle set
    pub fn prewarm(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            let unit = self.provision()?;
            self.release(unit);
        }
        Ok(())
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Kind of unit the next provisioning would try first
    pub fn preferred_kind(&self) -> UnitKind {
        match self.isolation {
            IsolationMode::Auto if self.host.available() => UnitKind::Isolated,
            IsolationMode::Threads => UnitKind::Isolated,
            _ => UnitKind::InContext,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle_count(),
            isolated_provisioned: self.counters.isolated_provisioned.load(Ordering::Relaxed),
            in_context_provisioned: self
                .counters
                .in_context_provisioned
                .load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
        }
    }

    /// Terminate every idle unit
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = std::mem::take(&mut *self.idle.lock());
        for unit in &drained {
            unit.terminate();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::OsThreads;
    use std::io;
    use std::thread;

    struct BrokenHost;

    impl ThreadHost for BrokenHost {
        fn available(&self) -> bool {
            true
        }

        fn spawn(
            &self,
            _name: String,
            _body: Box<dyn FnOnce() + Send>,
        ) -> io::Result<thread::JoinHandle<()>> {
            Err(io::Error::new(io::ErrorKind::Other, "thread limit"))
        }
    }

    fn pool(isolation: IsolationMode, host: Arc<dyn ThreadHost>, max_idle: usize) -> UnitPool {
        let hook: ExitHook = Arc::new(|_, _, _| {});
        UnitPool::new(BehaviorRegistry::new(), hook, isolation, host, max_idle)
    }

    #[tokio::test]
    async fn test_release_then_acquire_reuses_unit() {
        let pool = pool(IsolationMode::InContext, Arc::new(OsThreads), 4);
        let unit = pool.acquire().unwrap();
        let id = unit.id();

        pool.release(Arc::clone(&unit));
        pool.release(unit);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().reused, 1);
    }

    #[tokio::test]
    async fn test_failed_isolation_falls_back() {
        let pool = pool(IsolationMode::Threads, Arc::new(BrokenHost), 4);
        let unit = pool.acquire().unwrap();
        assert_eq!(unit.kind(), UnitKind::InContext);

        let stats = pool.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.in_context_provisioned, 1);
        assert_eq!(stats.isolated_provisioned, 0);
    }

    #[tokio::test]
    async fn test_evicted_unit_is_not_reused() {
        let pool = pool(IsolationMode::InContext, Arc::new(OsThreads), 4);
        let unit = pool.acquire().unwrap();
        pool.evict(&unit);
        assert!(!unit.is_open());

        pool.release(Arc::clone(&unit));
        assert_eq!(pool.idle_count(), 0);

        let fresh = pool.acquire().unwrap();
        assert_ne!(fresh.id(), unit.id());
    }

    #[tokio::test]
    async fn test_release_beyond_max_idle_retires() {
        let pool = pool(IsolationMode::InContext, Arc::new(OsThreads), 1);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        pool.release(first);
        pool.release(Arc::clone(&second));
        assert_eq!(pool.idle_count(), 1);
        assert!(!second.is_open());
        assert_eq!(pool.stats().retired, 1);
    }

    #[tokio::test]
    async fn test_prewarm_and_drain() {
        let pool = pool(IsolationMode::InContext, Arc::new(OsThreads), 8);
        pool.prewarm(3).unwrap();
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.drain(), 3);
        assert_eq!(pool.idle_count(), 0);
    }
}
