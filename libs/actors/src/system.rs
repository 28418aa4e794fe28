//! Process Runtime Core
//!
//! [`Runtime`] owns the five pieces of shared state (unit pool, process
//! table, name registry, timer set, monitor set) and exposes the process
//! API on top of them. It is a cheap-to-clone handle; independent runtimes
//! share nothing but the identity counters.
//!
//! # Lock Ordering
//!
//! When two locks are held together, ALWAYS take them in this order:
//! 1. `processes` (read)
//! 2. `names` or `monitors`
//!
//! The exit path (`reap`) takes each lock on its own and never nests them.

use crate::behavior::BehaviorRegistry;
use crate::error::{Result, RuntimeError};
use crate::monitor::{Monitor, MonitorSet};
use crate::pool::{PoolStats, UnitPool};
use crate::registry::NameRegistry;
use crate::router::{Delivery, ExitHook, SubscriptionId, UnitFate};
use crate::selector::Selector;
use crate::timer::TimerSet;
use crate::unit::{ExecutionUnit, OsThreads, ThreadHost, UnitKind};

use otp_config::RuntimeConfig;
use otp_types::{
    BehaviorSpec, CallError, CancelResult, Command, CorrelationId, ExitMessage, ExitReason, Pid,
    ProcessDown, RegistryError, Response, TimerRef, UnitId,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime-wide counters
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub processes_spawned: AtomicU64,
    pub processes_exited: AtomicU64,
    pub processes_killed: AtomicU64,
    pub processes_faulted: AtomicU64,
    pub messages_sent: AtomicU64,
    pub calls: AtomicU64,
    pub call_timeouts: AtomicU64,
    pub timers_scheduled: AtomicU64,
}

/// Point-in-time copy of [`RuntimeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processes_spawned: u64,
    pub processes_exited: u64,
    pub processes_killed: u64,
    pub processes_faulted: u64,
    pub messages_sent: u64,
    pub calls: u64,
    pub call_timeouts: u64,
    pub timers_scheduled: u64,
}

impl RuntimeMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processes_spawned: self.processes_spawned.load(Ordering::Relaxed),
            processes_exited: self.processes_exited.load(Ordering::Relaxed),
            processes_killed: self.processes_killed.load(Ordering::Relaxed),
            processes_faulted: self.processes_faulted.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            call_timeouts: self.call_timeouts.load(Ordering::Relaxed),
            timers_scheduled: self.timers_scheduled.load(Ordering::Relaxed),
        }
    }

    /// Processes started and not yet exited
    pub fn live(&self) -> u64 {
        let snapshot = self.snapshot();
        snapshot.processes_spawned.saturating_sub(
            snapshot.processes_exited + snapshot.processes_killed + snapshot.processes_faulted,
        )
    }
}

struct RuntimeInner {
    runtime_id: String,
    config: RuntimeConfig,
    behaviors: BehaviorRegistry,
    pool: UnitPool,
    /// Pid → allocated unit; membership is liveness
    processes: RwLock<HashMap<Pid, Arc<ExecutionUnit>>>,
    names: NameRegistry,
    timers: TimerSet,
    monitors: MonitorSet,
    metrics: RuntimeMetrics,
}

impl RuntimeInner {
    /// Exit hook target: called once per process exit, from whichever
    /// context observed it
    fn reap(&self, unit_id: UnitId, exit: Option<ExitMessage>, fate: UnitFate) {
        let Some(ExitMessage { pid, reason }) = exit else {
            if fate == UnitFate::Evict && self.pool.evict_idle(unit_id) {
                warn!(runtime_id = %self.runtime_id, unit_id = %unit_id, "Idle unit faulted");
            }
            return;
        };

        let unit = self.processes.write().remove(&pid);
        if let Some(name) = self.names.release_pid(pid) {
            debug!(pid = %pid, name = %name, "Released name of exited process");
        }

        match (unit, fate) {
            (Some(unit), UnitFate::Recycle) => self.pool.release(unit),
            (Some(unit), UnitFate::Evict) => self.pool.evict(&unit),
            (None, UnitFate::Evict) => {
                self.pool.evict_idle(unit_id);
            }
            (None, UnitFate::Recycle) => {}
        }

        let monitors = self.monitors.notify(pid, &reason);

        match &reason {
            ExitReason::Normal => {
                self.metrics.processes_exited.fetch_add(1, Ordering::Relaxed);
                info!(pid = %pid, unit_id = %unit_id, monitors, "Process exited normally");
            }
            ExitReason::Killed => {
                self.metrics.processes_killed.fetch_add(1, Ordering::Relaxed);
                info!(pid = %pid, unit_id = %unit_id, monitors, "Process killed");
            }
            ExitReason::Abnormal(detail) => {
                self.metrics.processes_faulted.fetch_add(1, Ordering::Relaxed);
                warn!(pid = %pid, unit_id = %unit_id, detail = %detail, monitors, "Process exited abnormally");
            }
        }
    }
}

/// Handle to a process runtime
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("runtime_id", &self.inner.runtime_id)
            .field("processes", &self.inner.processes.read().len())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Runtime {
    /// Runtime with an empty behavior registry
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_behaviors(config, BehaviorRegistry::new())
    }

    pub fn with_behaviors(config: RuntimeConfig, behaviors: BehaviorRegistry) -> Result<Self> {
        Self::with_host(config, behaviors, Arc::new(OsThreads))
    }

    /// Runtime provisioning isolated units from `host`
    pub fn with_host(
        config: RuntimeConfig,
        behaviors: BehaviorRegistry,
        host: Arc<dyn ThreadHost>,
    ) -> Result<Self> {
        let runtime_id = format!("runtime-{}", Uuid::new_v4().simple());
        let prewarm = config.pool.prewarm;

        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let weak = weak.clone();
            let exit_hook: ExitHook = Arc::new(move |unit_id, exit, fate| {
                if let Some(inner) = weak.upgrade() {
                    inner.reap(unit_id, exit, fate);
                }
            });

            RuntimeInner {
                pool: UnitPool::new(
                    behaviors.clone(),
                    exit_hook,
                    config.isolation,
                    host,
                    config.pool.max_idle,
                ),
                runtime_id,
                config,
                behaviors,
                processes: RwLock::new(HashMap::new()),
                names: NameRegistry::new(),
                timers: TimerSet::new(),
                monitors: MonitorSet::new(),
                metrics: RuntimeMetrics::default(),
            }
        });

        if prewarm > 0 {
            inner.pool.prewarm(prewarm)?;
        }

        info!(
            runtime_id = %inner.runtime_id,
            isolation = ?inner.config.isolation,
            preferred_unit = ?inner.pool.preferred_kind(),
            prewarm,
            "Process runtime created"
        );
        Ok(Self { inner })
    }

    pub fn runtime_id(&self) -> &str {
        &self.inner.runtime_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Registry of behaviors processes can be started with
    pub fn behaviors(&self) -> &BehaviorRegistry {
        &self.inner.behaviors
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    fn lookup(&self, pid: Pid) -> Option<Arc<ExecutionUnit>> {
        self.inner.processes.read().get(&pid).cloned()
    }

    fn require(&self, pid: Pid) -> Result<Arc<ExecutionUnit>> {
        self.lookup(pid).ok_or(RuntimeError::no_process(pid))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start a process running the behavior registered as `behavior`.
    ///
    /// Returns as soon as the setup command is queued.
    pub fn start(&self, behavior: &str, args: Value) -> Result<Pid> {
        if !self.inner.behaviors.contains(behavior) {
            return Err(RuntimeError::unknown_behavior(behavior));
        }

        let unit = self.inner.pool.acquire()?;
        let pid = Pid::next();

        unit.router().bind(pid);
        self.inner.processes.write().insert(pid, Arc::clone(&unit));

        if !unit.post(Command::setup(pid, BehaviorSpec::new(behavior, args))) {
            unit.router()
                .abandon(pid, ExitReason::abnormal("unit closed before setup"));
            return Err(RuntimeError::provisioning(format!(
                "execution unit {} closed before setup",
                unit.id()
            )));
        }

        self.inner
            .metrics
            .processes_spawned
            .fetch_add(1, Ordering::Relaxed);
        info!(
            pid = %pid,
            behavior = %behavior,
            unit_id = %unit.id(),
            kind = ?unit.kind(),
            "Process started"
        );
        Ok(pid)
    }

    /// Kill handshake: discard the process and recycle its unit once the
    /// unit acknowledges. Without acknowledgment in `timeouts.kill_ms`, the
    /// unit is evicted and `KillTimeout` returned; the process is dead
    /// either way.
    pub async fn kill(&self, pid: Pid) -> Result<()> {
        let unit = self.require(pid)?;
        let correlation = CorrelationId::next();
        let ack = unit
            .router()
            .expect_kill_ack(pid, correlation)
            .ok_or(RuntimeError::no_process(pid))?;

        if !unit.post(Command::kill(correlation)) {
            unit.router().abandon(pid, ExitReason::Killed);
            return Ok(());
        }

        let deadline = self.inner.config.timeouts.kill();
        match tokio::time::timeout(deadline, ack).await {
            Ok(Ok(reason)) => {
                debug!(pid = %pid, %reason, "Kill acknowledged");
                Ok(())
            }
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!(pid = %pid, unit_id = %unit.id(), ?deadline, "Kill not acknowledged, evicting unit");
                unit.router().abandon(pid, ExitReason::Killed);
                Err(RuntimeError::kill_timeout(pid, deadline))
            }
        }
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.inner.processes.read().contains_key(&pid)
    }

    /// Live Pids in issue order
    pub fn processes(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.inner.processes.read().keys().copied().collect();
        pids.sort();
        pids
    }

    /// Kind of unit hosting `pid`
    pub fn unit_kind(&self, pid: Pid) -> Option<UnitKind> {
        self.lookup(pid).map(|unit| unit.kind())
    }

    /// Cancel timers, kill every live process, terminate idle units
    pub async fn shutdown(&self) {
        info!(runtime_id = %self.inner.runtime_id, "Shutting down process runtime");

        let timers = self.inner.timers.cancel_all();
        let pids = self.processes();
        let results = futures::future::join_all(pids.iter().map(|pid| self.kill(*pid))).await;
        let unacknowledged = results
            .iter()
            .filter(|result| matches!(result, Err(RuntimeError::KillTimeout { .. })))
            .count();
        let units = self.inner.pool.drain();
        self.inner.names.clear();

        info!(
            runtime_id = %self.inner.runtime_id,
            processes = pids.len(),
            unacknowledged,
            timers,
            units,
            "Process runtime shut down"
        );
    }

    // ---------------------------------------------------------------------
    // Messaging
    // ---------------------------------------------------------------------

    /// Fire-and-forget. Messages to a dead Pid are dropped.
    pub fn send(&self, pid: Pid, message: Value) {
        let delivered = self
            .lookup(pid)
            .is_some_and(|unit| unit.post(Command::run(None, message)));

        if delivered {
            self.inner.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(pid = %pid, "Dropping message to dead process");
        }
    }

    /// Next uncorrelated reply from `pid`; `None` waits indefinitely.
    ///
    /// A receive already waiting when the process exits still gets the
    /// queued replies, then `NoProcess`. Once the process is reaped its
    /// mailbox is gone and `receive` fails with `NoProcess` right away.
    pub async fn receive(&self, pid: Pid, timeout: Option<Duration>) -> Result<Response> {
        let unit = self.require(pid)?;
        let inbox = unit
            .router()
            .inbox(pid)
            .ok_or(RuntimeError::no_process(pid))?;

        let next = async { inbox.lock().await.recv().await };
        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, next)
                .await
                .map_err(|_| RuntimeError::receive_timeout(pid, timeout))?,
            None => next.await,
        };

        // the mailbox closes once the process exits and is drained
        received.ok_or(RuntimeError::no_process(pid))
    }

    /// Request/reply. A reply that misses `timeout` is discarded, and the
    /// timeout is surfaced as [`RuntimeError::ProcessPresumedDead`]; the
    /// callee is left running.
    pub async fn call(&self, pid: Pid, request: Value, timeout: Duration) -> Result<Response> {
        let unit = self.require(pid)?;
        let correlation = CorrelationId::next();
        let reply = unit
            .router()
            .expect_reply(pid, correlation)
            .ok_or(RuntimeError::no_process(pid))?;

        if !unit.post(Command::run(Some(correlation), request)) {
            unit.router().forget(correlation);
            return Err(RuntimeError::no_process(pid));
        }
        self.inner.metrics.calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Delivery::Reply(status))) => status
                .into_response()
                .ok_or(RuntimeError::callee_exited(pid, ExitReason::Normal)),
            Ok(Ok(Delivery::Exited(reason))) => Err(RuntimeError::callee_exited(pid, reason)),
            Ok(Err(_)) => Err(RuntimeError::no_process(pid)),
            Err(_) => {
                unit.router().forget(correlation);
                self.inner
                    .metrics
                    .call_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                warn!(pid = %pid, correlation = %correlation, ?timeout, "Call timed out");
                Err(RuntimeError::process_presumed_dead(pid, timeout))
            }
        }
    }

    /// [`Runtime::call`] with the configured `timeouts.call_ms`
    pub async fn call_default(&self, pid: Pid, request: Value) -> Result<Response> {
        self.call(pid, request, self.inner.config.timeouts.call())
            .await
    }

    /// Request/reply with every failure as a typed value
    pub async fn try_call(
        &self,
        pid: Pid,
        request: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, CallError> {
        match self.call(pid, request, timeout).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::callee_down(error)),
            Err(RuntimeError::ProcessPresumedDead { .. }) => Err(CallError::CallTimeout),
            Err(RuntimeError::CalleeExited { reason, .. }) => {
                Err(CallError::callee_down(reason.to_string()))
            }
            Err(RuntimeError::NoProcess { .. }) => Err(CallError::callee_down("noproc")),
            Err(other) => Err(CallError::callee_down(other.to_string())),
        }
    }

    // ---------------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------------

    pub fn register(&self, pid: Pid, name: &str) -> std::result::Result<(), RegistryError> {
        let processes = self.inner.processes.read();
        self.inner
            .names
            .register(pid, name, processes.contains_key(&pid))
    }

    pub fn unregister(&self, name: &str) -> std::result::Result<(), RegistryError> {
        self.inner.names.unregister(name).map(|_| ())
    }

    pub fn named(&self, name: &str) -> Option<Pid> {
        self.inner.names.named(name)
    }

    /// All registered names, sorted
    pub fn registered(&self) -> Vec<String> {
        self.inner.names.registered()
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Deliver `message` to `pid` after `delay`, as if by [`Runtime::send`]
    pub fn send_after(&self, pid: Pid, delay: Duration, message: Value) -> Result<TimerRef> {
        let runtime = Arc::downgrade(&self.inner);
        let reference = self.inner.timers.schedule(delay, move || {
            if let Some(inner) = runtime.upgrade() {
                Runtime { inner }.send(pid, message);
            }
        })?;
        self.inner
            .metrics
            .timers_scheduled
            .fetch_add(1, Ordering::Relaxed);
        debug!(pid = %pid, timer = %reference, ?delay, "Timer scheduled");
        Ok(reference)
    }

    pub fn cancel_timer(&self, reference: TimerRef) -> CancelResult {
        self.inner.timers.cancel(reference)
    }

    /// Remaining time of a pending timer
    pub fn read_timer(&self, reference: TimerRef) -> Option<Duration> {
        self.inner.timers.read(reference)
    }

    // ---------------------------------------------------------------------
    // Monitors and selectors
    // ---------------------------------------------------------------------

    pub fn monitor_process(&self, pid: Pid) -> Monitor {
        let processes = self.inner.processes.read();
        self.inner
            .monitors
            .establish(pid, processes.contains_key(&pid))
    }

    /// Returns `false` if the monitor already resolved or was demonitored
    pub fn demonitor_process(&self, monitor: &Monitor) -> bool {
        self.inner.monitors.demonitor(monitor.reference())
    }

    /// Feed uncorrelated replies of `pid` into `selector` through
    /// `transform`. While any selector is subscribed, those replies bypass
    /// the mailbox and [`Runtime::receive`] does not see them.
    pub fn selecting<T, F>(
        &self,
        selector: &Selector<T>,
        pid: Pid,
        transform: F,
    ) -> Result<SubscriptionId>
    where
        T: Clone + Send + 'static,
        F: Fn(Response) -> T + Send + Sync + 'static,
    {
        let unit = self.require(pid)?;
        let selector = selector.clone();
        unit.router()
            .subscribe(pid, move |response| selector.post_message(transform(response)))
            .ok_or(RuntimeError::no_process(pid))
    }

    pub fn unselecting(&self, pid: Pid, subscription: SubscriptionId) -> bool {
        self.lookup(pid)
            .is_some_and(|unit| unit.router().unsubscribe(pid, subscription))
    }

    /// Post `mapping(down)` to `selector` when the monitored process dies,
    /// unless the monitor was demonitored first. Returns `false` if the
    /// monitor is no longer active.
    pub fn selecting_process_down<T, F>(
        &self,
        selector: &Selector<T>,
        monitor: &Monitor,
        mapping: F,
    ) -> bool
    where
        T: Clone + Send + 'static,
        F: FnOnce(ProcessDown) -> T + Send + 'static,
    {
        let selector = selector.clone();
        self.inner.monitors.tap(monitor.reference(), move |down| {
            selector.post_message(mapping(down.clone()))
        })
    }
}
