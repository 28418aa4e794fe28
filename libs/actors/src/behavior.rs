//! Process Behaviors
//!
//! A behavior is the code a process runs. Behaviors are registered by name
//! ahead of time; execution units only ever receive a [`BehaviorSpec`] (a
//! name plus data arguments) and build a fresh instance from the registered
//! factory on `setup`.

use async_trait::async_trait;
use otp_types::{BehaviorSpec, Pid};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// What a behavior does with one message
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer with `{status: ok, value}`
    Ok(Value),
    /// Answer with `{status: error, error}`
    Error(Value),
    /// Discard state and terminate the process normally
    Stop,
}

impl Reply {
    pub fn ok(value: impl Into<Value>) -> Self {
        Reply::Ok(value.into())
    }

    pub fn error(error: impl Into<Value>) -> Self {
        Reply::Error(error.into())
    }
}

/// Identity and setup arguments of the process a behavior instance serves
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessContext {
    pid: Pid,
    args: Value,
}

impl ProcessContext {
    pub fn new(pid: Pid, args: Value) -> Self {
        Self { pid, args }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn args(&self) -> &Value {
        &self.args
    }
}

/// Trait for process behavior
///
/// Called once per message, never concurrently for the same process.
#[async_trait]
pub trait Behavior: Send + 'static {
    async fn handle(&mut self, ctx: &ProcessContext, payload: Value) -> Reply;
}

type Factory = Arc<dyn Fn(&Value) -> Box<dyn Behavior> + Send + Sync>;

/// Stateless behavior built from an async function
struct FnBehavior<F, Fut> {
    handler: Arc<F>,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Behavior for FnBehavior<F, Fut>
where
    F: Fn(ProcessContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    async fn handle(&mut self, ctx: &ProcessContext, payload: Value) -> Reply {
        (self.handler)(ctx.clone(), payload).await
    }
}

/// Name → factory table shared by the runtime and every execution unit
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    factories: Arc<RwLock<HashMap<String, Factory>>>,
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("behaviors", &self.names())
            .finish()
    }
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stateful behavior; `factory` builds one instance per process
    /// from the setup arguments. Re-registering a name replaces it for
    /// processes started afterwards.
    pub fn register<F, B>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> B + Send + Sync + 'static,
        B: Behavior,
    {
        let name = name.into();
        debug!(behavior = %name, "Registering behavior");
        let factory: Factory =
            Arc::new(move |args: &Value| -> Box<dyn Behavior> { Box::new(factory(args)) });
        self.factories.write().insert(name, factory);
    }

    /// Register a stateless behavior from an async handler
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(ProcessContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |_args| FnBehavior {
            handler: Arc::clone(&handler),
            _future: PhantomData,
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a fresh instance for `spec`, or `None` if the name is unknown
    pub fn instantiate(&self, spec: &BehaviorSpec) -> Option<Box<dyn Behavior>> {
        let factory = self.factories.read().get(&spec.name).cloned()?;
        Some(factory(&spec.args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter {
        count: i64,
    }

    #[async_trait]
    impl Behavior for Counter {
        async fn handle(&mut self, _ctx: &ProcessContext, payload: Value) -> Reply {
            self.count += payload.as_i64().unwrap_or(1);
            Reply::ok(self.count)
        }
    }

    #[tokio::test]
    async fn test_factory_builds_independent_instances() {
        let registry = BehaviorRegistry::new();
        registry.register("counter", |args: &Value| Counter {
            count: args.as_i64().unwrap_or(0),
        });

        let spec = BehaviorSpec::new("counter", json!(10));
        let ctx = ProcessContext::new(Pid::next(), spec.args.clone());

        let mut first = registry.instantiate(&spec).unwrap();
        let mut second = registry.instantiate(&spec).unwrap();

        assert_eq!(first.handle(&ctx, json!(5)).await, Reply::ok(15));
        assert_eq!(first.handle(&ctx, json!(5)).await, Reply::ok(20));
        assert_eq!(second.handle(&ctx, json!(1)).await, Reply::ok(11));
    }

    #[tokio::test]
    async fn test_register_fn_sees_context() {
        let registry = BehaviorRegistry::new();
        registry.register_fn("whoami", |ctx: ProcessContext, _payload| async move {
            Reply::ok(ctx.pid().id())
        });

        let pid = Pid::next();
        let ctx = ProcessContext::new(pid, Value::Null);
        let mut instance = registry
            .instantiate(&BehaviorSpec::new("whoami", Value::Null))
            .unwrap();

        assert_eq!(instance.handle(&ctx, Value::Null).await, Reply::ok(pid.id()));
    }

    #[test]
    fn test_unknown_behavior() {
        let registry = BehaviorRegistry::new();
        assert!(!registry.contains("missing"));
        assert!(registry
            .instantiate(&BehaviorSpec::new("missing", Value::Null))
            .is_none());
    }

    #[test]
    fn test_names_sorted() {
        let registry = BehaviorRegistry::new();
        registry.register_fn("b", |_, _| async { Reply::Stop });
        registry.register_fn("a", |_, _| async { Reply::Stop });
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
