//! One-shot tasks
//!
//! Run a single request against a fresh process and tear it down afterwards,
//! whatever the outcome. Built only on `start`, `call` and `kill`.

use crate::error::RuntimeError;
use crate::system::Runtime;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Why a one-shot task produced no value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The behavior answered with an error reply
    #[error("Task failed: {0}")]
    Failed(Value),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Start `behavior`, send it `payload`, return its single reply
pub async fn run_once(
    runtime: &Runtime,
    behavior: &str,
    args: Value,
    payload: Value,
    timeout: Duration,
) -> Result<Value, TaskError> {
    let pid = runtime.start(behavior, args)?;
    let outcome = runtime.call(pid, payload, timeout).await;

    if runtime.is_alive(pid) {
        if let Err(error) = runtime.kill(pid).await {
            debug!(pid = %pid, error = %error, "One-shot task teardown failed");
        }
    }

    match outcome? {
        Ok(value) => Ok(value),
        Err(error) => Err(TaskError::Failed(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{BehaviorRegistry, Reply};
    use otp_config::RuntimeConfig;
    use serde_json::json;

    fn runtime() -> Runtime {
        let behaviors = BehaviorRegistry::new();
        behaviors.register_fn("answer", |_ctx, _payload| async move { Reply::ok(42) });
        behaviors.register_fn("double", |_ctx, payload: Value| async move {
            match payload.as_i64() {
                Some(n) => Reply::ok(n * 2),
                None => Reply::error("not a number"),
            }
        });
        Runtime::with_behaviors(RuntimeConfig::in_context(), behaviors).unwrap()
    }

    #[tokio::test]
    async fn test_returns_single_reply_and_tears_down() {
        let runtime = runtime();
        let value = run_once(&runtime, "answer", Value::Null, Value::Null, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(value, json!(42));
        assert!(runtime.processes().is_empty());
        assert_eq!(runtime.metrics().processes_killed, 1);
    }

    #[tokio::test]
    async fn test_error_reply_is_failure() {
        let runtime = runtime();
        let err = run_once(&runtime, "double", Value::Null, json!("x"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err, TaskError::Failed(json!("not a number")));
        assert!(runtime.processes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_behavior() {
        let runtime = runtime();
        let err = run_once(&runtime, "nope", Value::Null, Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::Runtime(RuntimeError::UnknownBehavior { .. })
        ));
    }
}
