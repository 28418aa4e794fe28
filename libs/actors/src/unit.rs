//! Execution Units
//!
//! An execution unit hosts at most one process at a time and speaks the
//! setup/run/kill command protocol. Two kinds share one command loop
//! ([`drive`]):
//!
//! - [`UnitKind::Isolated`]: a dedicated OS thread running its own
//!   current-thread tokio runtime.
//! - [`UnitKind::InContext`]: the fallback executor, a task on the caller's
//!   runtime. Same protocol, no isolation.
//!
//! Units never receive code. `setup` carries a [`otp_types::BehaviorSpec`]
//! that is resolved against the shared [`BehaviorRegistry`].

use crate::behavior::{Behavior, BehaviorRegistry, ProcessContext, Reply};
use crate::error::{Result, RuntimeError};
use crate::router::{EventRouter, ExitHook};
use futures::FutureExt;
use otp_types::{Command, Event, Pid, UnitId};
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Where a unit's command loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Isolated,
    InContext,
}

/// Source of dedicated threads for isolated units
pub trait ThreadHost: Send + Sync + 'static {
    /// Capability probe; `false` sends every unit to the fallback executor
    fn available(&self) -> bool;

    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> io::Result<thread::JoinHandle<()>>;
}

/// Plain OS threads
#[derive(Debug, Default, Clone, Copy)]
pub struct OsThreads;

impl ThreadHost for OsThreads {
    fn available(&self) -> bool {
        thread::available_parallelism().is_ok()
    }

    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(body)
    }
}

enum Worker {
    Thread(thread::JoinHandle<()>),
    Task(JoinHandle<()>),
}

/// One pooled execution context
pub struct ExecutionUnit {
    id: UnitId,
    kind: UnitKind,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    router: Arc<EventRouter>,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .field("bound_pid", &self.router.bound_pid())
            .finish()
    }
}

impl ExecutionUnit {
    /// Provision a unit on a dedicated thread obtained from `host`.
    ///
    /// Never waits for the thread: commands queue until its runtime is up,
    /// and a runtime that fails to build faults the unit from the thread.
    pub(crate) fn spawn_isolated(
        host: &dyn ThreadHost,
        behaviors: BehaviorRegistry,
        exit_hook: ExitHook,
    ) -> Result<Arc<Self>> {
        let id = UnitId::next();
        let router = Arc::new(EventRouter::new(id, exit_hook));
        let (tx, rx) = mpsc::unbounded_channel();

        let loop_router = Arc::clone(&router);
        let body = Box::new(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(drive(rx, behaviors, loop_router)),
                Err(e) => {
                    drop(rx);
                    loop_router.fault(format!("unit runtime failed to start: {}", e));
                }
            }
        });

        let handle = host
            .spawn(format!("otp-{}", id), body)
            .map_err(|e| RuntimeError::provisioning(format!("thread spawn failed: {}", e)))?;

        debug!(unit_id = %id, "Provisioned isolated execution unit");
        Ok(Arc::new(Self {
            id,
            kind: UnitKind::Isolated,
            commands: Mutex::new(Some(tx)),
            router,
            worker: Mutex::new(Some(Worker::Thread(handle))),
        }))
    }

    /// Provision the fallback executor on the current tokio runtime
    pub(crate) fn spawn_in_context(
        behaviors: BehaviorRegistry,
        exit_hook: ExitHook,
    ) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|e| RuntimeError::unavailable(e.to_string()))?;

        let id = UnitId::next();
        let router = Arc::new(EventRouter::new(id, exit_hook));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = handle.spawn(drive(rx, behaviors, Arc::clone(&router)));

        debug!(unit_id = %id, "Provisioned in-context execution unit");
        Ok(Arc::new(Self {
            id,
            kind: UnitKind::InContext,
            commands: Mutex::new(Some(tx)),
            router,
            worker: Mutex::new(Some(Worker::Task(task))),
        }))
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub(crate) fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn bound_pid(&self) -> Option<Pid> {
        self.router.bound_pid()
    }

    /// Queue a command; `false` if the unit has stopped accepting them
    pub(crate) fn post(&self, command: Command) -> bool {
        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Whether the command loop is still running
    pub fn is_open(&self) -> bool {
        self.commands
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Stop the command loop. An in-context task is aborted; an isolated
    /// thread exits once its current command returns.
    pub(crate) fn terminate(&self) {
        self.commands.lock().take();
        match self.worker.lock().take() {
            Some(Worker::Task(task)) => task.abort(),
            Some(Worker::Thread(_detached)) => {}
            None => {}
        }
        trace!(unit_id = %self.id, "Execution unit terminated");
    }
}

/// Command loop shared by both unit kinds
pub(crate) async fn drive(
    mut commands: mpsc::UnboundedReceiver<Command>,
    behaviors: BehaviorRegistry,
    router: Arc<EventRouter>,
) {
    let unit_id = router.unit_id();
    let mut bound: Option<(ProcessContext, Box<dyn Behavior>)> = None;
    // process the unit serves, from setup until stop or kill
    let mut serving: Option<Pid> = None;

    while let Some(command) = commands.recv().await {
        trace!(unit_id = %unit_id, command = command.name(), "Unit command");

        match command {
            Command::Setup { identity, behavior } => {
                serving = Some(identity);
                let built =
                    std::panic::catch_unwind(AssertUnwindSafe(|| behaviors.instantiate(&behavior)));
                match built {
                    Ok(Some(instance)) => {
                        bound = Some((ProcessContext::new(identity, behavior.args), instance));
                    }
                    Ok(None) => {
                        warn!(
                            unit_id = %unit_id,
                            pid = %identity,
                            behavior = %behavior.name,
                            "Setup named an unknown behavior"
                        );
                        bound = None;
                        router.dispatch(
                            serving,
                            Event::error(
                                None,
                                json!({ "message": format!("Unknown behavior: {}", behavior.name) }),
                            ),
                        );
                    }
                    Err(panic) => {
                        router.fault(format!("setup panicked: {}", panic_detail(&*panic)));
                        return;
                    }
                }
            }
            Command::Run {
                correlation,
                payload,
            } => {
                let Some((ctx, behavior)) = bound.as_mut() else {
                    router.dispatch(serving, Event::invalid_command(correlation));
                    continue;
                };

                let outcome = AssertUnwindSafe(behavior.handle(ctx, payload))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Reply::Ok(value)) => {
                        router.dispatch(serving, Event::ok(correlation, value))
                    }
                    Ok(Reply::Error(error)) => {
                        router.dispatch(serving, Event::error(correlation, error))
                    }
                    Ok(Reply::Stop) => {
                        bound = None;
                        router.dispatch(serving.take(), Event::done(correlation));
                    }
                    Err(panic) => {
                        router.fault(panic_detail(&*panic));
                        return;
                    }
                }
            }
            Command::Kill { correlation } => {
                bound = None;
                router.dispatch(serving.take(), Event::done(Some(correlation)));
            }
            Command::Unrecognized => {
                router.dispatch(serving, Event::invalid_command(None));
            }
        }
    }

    trace!(unit_id = %unit_id, "Command channel closed");
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
