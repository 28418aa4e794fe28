//! Unit Event Routing
//!
//! Every execution unit reports through one [`EventRouter`], which turns the
//! unit's single outbound event stream into addressable deliveries:
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!  event{correlation: c} │ pending[c] ──▶ call / kill   │  exactly one consumer
//!                        │                              │
//!  event{correlation: -} │ selectors  ──▶ fan-out       │  multicast, in order
//!                        │ or mailbox ──▶ receive       │  FIFO, single consumer
//!                        │                              │
//!  done / fault          │ exit hook  ──▶ runtime reap  │  once per binding
//!                        └──────────────────────────────┘
//! ```
//!
//! An uncorrelated reply goes to the selectors subscribed to the process,
//! or to its mailbox when there are none, never both.
//!
//! The unit tags every event with the Pid it was serving when the event was
//! produced. Commands queued behind a self-stop run after the unit is
//! rebound; their `done` and uncorrelated events carry the old Pid (or
//! none) and are dropped instead of reaching the new process.
//!
//! All per-process state lives in a [`Binding`] that is created when a Pid is
//! bound to the unit and taken exactly once when the process exits, so a
//! recycled unit never leaks replies, subscriptions or waiters from the
//! previous process.

use otp_types::{CorrelationId, Event, ExitMessage, ExitReason, Pid, Response, Status, UnitId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// What happens to a unit after its process exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFate {
    /// Clean exit; the unit may go back to the idle pool
    Recycle,
    /// Faulted or abandoned; the unit must be torn down
    Evict,
}

/// Called once per binding when the bound process exits, and on faults of
/// unbound units (with no exit message)
pub(crate) type ExitHook = Arc<dyn Fn(UnitId, Option<ExitMessage>, UnitFate) + Send + Sync>;

/// Handle to a selector subscription on one process's replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a correlated waiter eventually receives
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Delivery {
    Reply(Status),
    Exited(ExitReason),
}

enum Pending {
    Call(oneshot::Sender<Delivery>),
    Kill(oneshot::Sender<ExitReason>),
}

type Subscriber = Arc<dyn Fn(Response) + Send + Sync>;
pub(crate) type Inbox = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Response>>>;

/// Per-process routing state
struct Binding {
    pid: Pid,
    pending: HashMap<CorrelationId, Pending>,
    mailbox: mpsc::UnboundedSender<Response>,
    inbox: Inbox,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

impl Binding {
    fn new(pid: Pid) -> Self {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        Self {
            pid,
            pending: HashMap::new(),
            mailbox,
            inbox: Arc::new(tokio::sync::Mutex::new(inbox)),
            subscribers: Vec::new(),
        }
    }

    /// Wake every remaining waiter with the exit reason
    fn close(self, reason: &ExitReason) {
        for (_, pending) in self.pending {
            match pending {
                Pending::Call(tx) => {
                    let _ = tx.send(Delivery::Exited(reason.clone()));
                }
                Pending::Kill(tx) => {
                    let _ = tx.send(reason.clone());
                }
            }
        }
    }
}

/// Event router of one execution unit
pub struct EventRouter {
    unit_id: UnitId,
    binding: Mutex<Option<Binding>>,
    exit_hook: ExitHook,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("unit_id", &self.unit_id)
            .field("bound_pid", &self.bound_pid())
            .finish()
    }
}

impl EventRouter {
    pub(crate) fn new(unit_id: UnitId, exit_hook: ExitHook) -> Self {
        Self {
            unit_id,
            binding: Mutex::new(None),
            exit_hook,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn bound_pid(&self) -> Option<Pid> {
        self.binding.lock().as_ref().map(|binding| binding.pid)
    }

    /// Attach a fresh process to this unit
    pub(crate) fn bind(&self, pid: Pid) {
        let previous = self.binding.lock().replace(Binding::new(pid));
        if let Some(previous) = previous {
            warn!(
                unit_id = %self.unit_id,
                previous_pid = %previous.pid,
                pid = %pid,
                "Binding unit that still held a process"
            );
            previous.close(&ExitReason::Killed);
        }
    }

    /// Reserve a reply slot for a `run` request
    pub(crate) fn expect_reply(
        &self,
        pid: Pid,
        correlation: CorrelationId,
    ) -> Option<oneshot::Receiver<Delivery>> {
        let mut guard = self.binding.lock();
        let binding = guard.as_mut().filter(|binding| binding.pid == pid)?;
        let (tx, rx) = oneshot::channel();
        binding.pending.insert(correlation, Pending::Call(tx));
        Some(rx)
    }

    /// Reserve the acknowledgment slot for a `kill` request
    pub(crate) fn expect_kill_ack(
        &self,
        pid: Pid,
        correlation: CorrelationId,
    ) -> Option<oneshot::Receiver<ExitReason>> {
        let mut guard = self.binding.lock();
        let binding = guard.as_mut().filter(|binding| binding.pid == pid)?;
        let (tx, rx) = oneshot::channel();
        binding.pending.insert(correlation, Pending::Kill(tx));
        Some(rx)
    }

    /// Retract a waiter that gave up; its reply will be dropped on arrival
    pub(crate) fn forget(&self, correlation: CorrelationId) {
        if let Some(binding) = self.binding.lock().as_mut() {
            binding.pending.remove(&correlation);
        }
    }

    /// Receiving end of the mailbox of `pid`, if it is bound here
    pub(crate) fn inbox(&self, pid: Pid) -> Option<Inbox> {
        self.binding
            .lock()
            .as_ref()
            .filter(|binding| binding.pid == pid)
            .map(|binding| Arc::clone(&binding.inbox))
    }

    pub(crate) fn subscribe(
        &self,
        pid: Pid,
        subscriber: impl Fn(Response) + Send + Sync + 'static,
    ) -> Option<SubscriptionId> {
        let mut guard = self.binding.lock();
        let binding = guard.as_mut().filter(|binding| binding.pid == pid)?;
        let id = SubscriptionId::next();
        binding.subscribers.push((id, Arc::new(subscriber)));
        Some(id)
    }

    pub(crate) fn unsubscribe(&self, pid: Pid, id: SubscriptionId) -> bool {
        let mut guard = self.binding.lock();
        match guard.as_mut().filter(|binding| binding.pid == pid) {
            Some(binding) => {
                let before = binding.subscribers.len();
                binding.subscribers.retain(|(existing, _)| *existing != id);
                binding.subscribers.len() != before
            }
            None => false,
        }
    }

    /// Route one event emitted by the unit while serving `origin`
    pub(crate) fn dispatch(&self, origin: Option<Pid>, event: Event) {
        trace!(unit_id = %self.unit_id, ?origin, ?event, "Unit event");
        let Event {
            correlation,
            status,
        } = event;

        if status.is_done() {
            self.on_done(origin, correlation);
            return;
        }

        match correlation {
            Some(correlation) => self.deliver_correlated(correlation, status),
            None => self.deliver_uncorrelated(origin, status),
        }
    }

    fn deliver_correlated(&self, correlation: CorrelationId, status: Status) {
        let pending = self
            .binding
            .lock()
            .as_mut()
            .and_then(|binding| binding.pending.remove(&correlation));

        match pending {
            Some(Pending::Call(tx)) => {
                let _ = tx.send(Delivery::Reply(status));
            }
            Some(Pending::Kill(tx)) => {
                warn!(
                    unit_id = %self.unit_id,
                    correlation = %correlation,
                    "Kill token answered with a reply; treating as acknowledged"
                );
                let _ = tx.send(ExitReason::Killed);
            }
            None => {
                debug!(
                    unit_id = %self.unit_id,
                    correlation = %correlation,
                    "Dropping reply with no waiting caller"
                );
            }
        }
    }

    fn deliver_uncorrelated(&self, origin: Option<Pid>, status: Status) {
        let Some(response) = status.into_response() else {
            return;
        };

        let subscribers = {
            let guard = self.binding.lock();
            let Some(binding) = guard.as_ref().filter(|binding| Some(binding.pid) == origin)
            else {
                debug!(unit_id = %self.unit_id, ?origin, "Dropping reply of a departed process");
                return;
            };
            if binding.subscribers.is_empty() {
                let _ = binding.mailbox.send(response);
                return;
            }
            binding
                .subscribers
                .iter()
                .map(|(_, subscriber)| Arc::clone(subscriber))
                .collect::<Vec<_>>()
        };

        for subscriber in subscribers {
            subscriber(response.clone());
        }
    }

    /// The unit discarded its behavior: after a kill, or a behavior `Stop`.
    /// A `done` for any process other than the bound one is stale.
    fn on_done(&self, origin: Option<Pid>, correlation: Option<CorrelationId>) {
        let taken = {
            let mut guard = self.binding.lock();
            match guard.as_ref() {
                Some(binding) if Some(binding.pid) == origin => guard.take(),
                _ => None,
            }
        };
        let Some(mut binding) = taken else {
            debug!(
                unit_id = %self.unit_id,
                ?origin,
                ?correlation,
                bound_pid = ?self.bound_pid(),
                "Dropping stale done"
            );
            return;
        };

        let waiter = correlation.and_then(|c| binding.pending.remove(&c));
        let reason = match waiter {
            Some(Pending::Kill(_)) => ExitReason::Killed,
            _ => ExitReason::Normal,
        };
        let pid = binding.pid;

        (self.exit_hook)(
            self.unit_id,
            Some(ExitMessage::new(pid, reason.clone())),
            UnitFate::Recycle,
        );

        match waiter {
            Some(Pending::Kill(tx)) => {
                let _ = tx.send(reason.clone());
            }
            Some(Pending::Call(tx)) => {
                let _ = tx.send(Delivery::Reply(Status::Done));
            }
            None => {}
        }
        binding.close(&reason);
    }

    /// The unit crashed; it will not process further commands
    pub(crate) fn fault(&self, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(unit_id = %self.unit_id, detail = %detail, "Execution unit faulted");
        let binding = self.binding.lock().take();
        self.release(binding, ExitReason::Abnormal(detail));
    }

    /// Give up on `pid` without the unit's cooperation. Returns `false` if
    /// the unit no longer hosts that process.
    pub(crate) fn abandon(&self, pid: Pid, reason: ExitReason) -> bool {
        let binding = {
            let mut guard = self.binding.lock();
            if guard.as_ref().map(|binding| binding.pid) != Some(pid) {
                return false;
            }
            guard.take()
        };
        debug!(unit_id = %self.unit_id, pid = %pid, %reason, "Abandoning execution unit");
        self.release(binding, reason);
        true
    }

    fn release(&self, binding: Option<Binding>, reason: ExitReason) {
        let exit = binding
            .as_ref()
            .map(|binding| ExitMessage::new(binding.pid, reason.clone()));

        (self.exit_hook)(self.unit_id, exit, UnitFate::Evict);

        if let Some(binding) = binding {
            binding.close(&reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Exits = Arc<Mutex<Vec<(Option<ExitMessage>, UnitFate)>>>;

    fn router() -> (EventRouter, Exits) {
        let exits: Exits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&exits);
        let hook: ExitHook = Arc::new(move |_, exit, fate| seen.lock().push((exit, fate)));
        (EventRouter::new(UnitId::next(), hook), exits)
    }

    #[tokio::test]
    async fn test_correlated_reply_reaches_only_its_caller() {
        let (router, _) = router();
        let pid = Pid::next();
        router.bind(pid);

        let first = CorrelationId::next();
        let second = CorrelationId::next();
        let rx_first = router.expect_reply(pid, first).unwrap();
        let rx_second = router.expect_reply(pid, second).unwrap();

        router.dispatch(Some(pid), Event::ok(Some(second), json!("b")));
        router.dispatch(Some(pid), Event::ok(Some(first), json!("a")));

        assert_eq!(
            rx_first.await.unwrap(),
            Delivery::Reply(Status::Ok { value: json!("a") })
        );
        assert_eq!(
            rx_second.await.unwrap(),
            Delivery::Reply(Status::Ok { value: json!("b") })
        );

        // nothing leaked into the mailbox
        let inbox = router.inbox(pid).unwrap();
        assert!(inbox.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forgotten_reply_is_dropped() {
        let (router, _) = router();
        let pid = Pid::next();
        router.bind(pid);

        let correlation = CorrelationId::next();
        let _rx = router.expect_reply(pid, correlation).unwrap();
        router.forget(correlation);
        router.dispatch(Some(pid), Event::ok(Some(correlation), json!("late")));

        let inbox = router.inbox(pid).unwrap();
        assert!(inbox.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_uncorrelated_reply_goes_to_mailbox() {
        let (router, _) = router();
        let pid = Pid::next();
        router.bind(pid);

        router.dispatch(Some(pid), Event::ok(None, json!(1)));
        router.dispatch(Some(pid), Event::error(None, json!("bad")));

        let inbox = router.inbox(pid).unwrap();
        let mut inbox = inbox.lock().await;
        assert_eq!(inbox.recv().await, Some(Ok(json!(1))));
        assert_eq!(inbox.recv().await, Some(Err(json!("bad"))));
    }

    #[tokio::test]
    async fn test_subscribers_take_replies_from_mailbox() {
        let (router, _) = router();
        let pid = Pid::next();
        router.bind(pid);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let a = router
            .subscribe(pid, move |response| first.lock().push(("a", response)))
            .unwrap();
        let b = router
            .subscribe(pid, move |response| second.lock().push(("b", response)))
            .unwrap();

        router.dispatch(Some(pid), Event::ok(None, json!(1)));
        assert_eq!(
            *seen.lock(),
            vec![("a", Ok(json!(1))), ("b", Ok(json!(1)))]
        );

        let inbox = router.inbox(pid).unwrap();
        assert!(inbox.lock().await.try_recv().is_err());

        // with the last subscriber gone the mailbox takes over
        assert!(router.unsubscribe(pid, a));
        assert!(router.unsubscribe(pid, b));
        router.dispatch(Some(pid), Event::ok(None, json!(2)));
        assert_eq!(inbox.lock().await.try_recv().unwrap(), Ok(json!(2)));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_events_do_not_reach_rebound_process() {
        let (router, exits) = router();
        let old = Pid::next();
        router.bind(old);
        let kill = CorrelationId::next();
        let ack = router.expect_kill_ack(old, kill).unwrap();

        // the process stops itself before the kill is processed
        router.dispatch(Some(old), Event::done(None));
        assert_eq!(ack.await.unwrap(), ExitReason::Normal);

        let new = Pid::next();
        router.bind(new);

        // commands queued behind the stop run with nothing bound
        router.dispatch(None, Event::done(Some(kill)));
        router.dispatch(None, Event::invalid_command(None));
        router.dispatch(Some(old), Event::ok(None, json!("late")));

        assert_eq!(router.bound_pid(), Some(new));
        assert_eq!(
            *exits.lock(),
            vec![(
                Some(ExitMessage::new(old, ExitReason::Normal)),
                UnitFate::Recycle
            )]
        );
        let inbox = router.inbox(new).unwrap();
        assert!(inbox.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_kill_ack_reports_killed_and_recycles() {
        let (router, exits) = router();
        let pid = Pid::next();
        router.bind(pid);

        let correlation = CorrelationId::next();
        let ack = router.expect_kill_ack(pid, correlation).unwrap();
        router.dispatch(Some(pid), Event::done(Some(correlation)));

        assert_eq!(ack.await.unwrap(), ExitReason::Killed);
        assert_eq!(router.bound_pid(), None);
        assert_eq!(
            *exits.lock(),
            vec![(
                Some(ExitMessage::new(pid, ExitReason::Killed)),
                UnitFate::Recycle
            )]
        );
    }

    #[tokio::test]
    async fn test_fault_wakes_pending_callers() {
        let (router, exits) = router();
        let pid = Pid::next();
        router.bind(pid);

        let rx = router.expect_reply(pid, CorrelationId::next()).unwrap();
        router.fault("boom");

        assert_eq!(
            rx.await.unwrap(),
            Delivery::Exited(ExitReason::abnormal("boom"))
        );
        assert_eq!(exits.lock()[0].1, UnitFate::Evict);
        assert!(router.inbox(pid).is_none());
    }

    #[tokio::test]
    async fn test_abandon_ignores_stale_pid() {
        let (router, exits) = router();
        let old = Pid::next();
        let new = Pid::next();
        router.bind(new);

        assert!(!router.abandon(old, ExitReason::Killed));
        assert!(exits.lock().is_empty());
        assert_eq!(router.bound_pid(), Some(new));

        assert!(router.abandon(new, ExitReason::Killed));
        assert_eq!(
            *exits.lock(),
            vec![(
                Some(ExitMessage::new(new, ExitReason::Killed)),
                UnitFate::Evict
            )]
        );
    }

    #[tokio::test]
    async fn test_slots_are_scoped_to_bound_pid() {
        let (router, _) = router();
        let pid = Pid::next();
        router.bind(pid);

        let stranger = Pid::next();
        assert!(router.expect_reply(stranger, CorrelationId::next()).is_none());
        assert!(router.inbox(stranger).is_none());
        assert!(router.subscribe(stranger, |_| {}).is_none());
    }
}
