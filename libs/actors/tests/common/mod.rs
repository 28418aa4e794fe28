//! Common Test Utilities for the Process Runtime
//!
//! Shared behaviors and runtime constructors for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use otp_actors::{Behavior, BehaviorRegistry, ProcessContext, Reply, Runtime, ThreadHost};
use otp_config::{IsolationMode, RuntimeConfig};
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Running total seeded from the setup arguments
pub struct Counter {
    total: i64,
}

#[async_trait]
impl Behavior for Counter {
    async fn handle(&mut self, _ctx: &ProcessContext, payload: Value) -> Reply {
        match payload.as_i64() {
            Some(n) => {
                self.total += n;
                Reply::ok(self.total)
            }
            None => Reply::error(json!({"expected": "integer", "got": payload})),
        }
    }
}

/// Registry with every behavior the suites use
pub fn behaviors() -> BehaviorRegistry {
    let behaviors = BehaviorRegistry::new();

    behaviors.register_fn("echo", |_ctx, payload| async move { Reply::Ok(payload) });
    behaviors.register_fn("answer", |_ctx, _payload| async move { Reply::ok(42) });
    behaviors.register_fn("reject", |_ctx, payload| async move { Reply::Error(payload) });
    behaviors.register_fn("stop", |_ctx, _payload| async move { Reply::Stop });
    behaviors.register_fn("stop_on_request", |_ctx, payload: Value| async move {
        if payload == json!("stop") {
            Reply::Stop
        } else {
            Reply::Ok(payload)
        }
    });
    behaviors.register_fn("whoami", |ctx: ProcessContext, _payload| async move {
        Reply::ok(ctx.pid().id())
    });

    // replies after `payload` milliseconds
    behaviors.register_fn("slow", |_ctx, payload: Value| async move {
        let delay = payload.as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Reply::ok("slow reply")
    });

    // never answers
    behaviors.register_fn("stuck", |_ctx, _payload| async move {
        std::future::pending::<()>().await;
        Reply::Stop
    });

    behaviors.register_fn("crash", |_ctx, payload: Value| async move {
        if payload == json!("boom") {
            panic!("boom");
        }
        Reply::Ok(payload)
    });

    behaviors.register("counter", |args: &Value| Counter {
        total: args.as_i64().unwrap_or(0),
    });

    behaviors
}

/// Runtime on the fallback executor, driven by the test's own tokio runtime
pub fn in_context_runtime() -> Runtime {
    Runtime::with_behaviors(RuntimeConfig::in_context(), behaviors())
        .expect("in-context runtime")
}

/// Runtime with dedicated threads per unit
pub fn isolated_runtime() -> Runtime {
    let config = RuntimeConfig {
        isolation: IsolationMode::Threads,
        ..RuntimeConfig::default()
    };
    Runtime::with_behaviors(config, behaviors()).expect("isolated runtime")
}

/// Host that advertises threads but cannot spawn any
pub struct BrokenHost;

impl ThreadHost for BrokenHost {
    fn available(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        _name: String,
        _body: Box<dyn FnOnce() + Send>,
    ) -> io::Result<thread::JoinHandle<()>> {
        Err(io::Error::new(io::ErrorKind::Other, "thread quota exhausted"))
    }
}

/// Runtime asked for isolation on a host that cannot provide it
pub fn degraded_runtime() -> Runtime {
    let config = RuntimeConfig {
        isolation: IsolationMode::Threads,
        ..RuntimeConfig::default()
    };
    Runtime::with_host(config, behaviors(), Arc::new(BrokenHost)).expect("degraded runtime")
}
