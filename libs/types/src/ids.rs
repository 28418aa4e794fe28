//! Process-wide identities
//!
//! Every identity is issued from its own monotonically increasing counter and
//! is never reused. Identities carry no behavior: a [`Pid`] does not point at
//! an execution unit, liveness is always looked up through the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $format:literal) => {
        static $counter: AtomicU64 = AtomicU64::new(1);

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Issue the next identity from the process-wide counter
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Numeric value of this identity
            pub fn id(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, $format, self.0)
            }
        }
    };
}

counter_id!(
    /// Opaque process identifier
    ///
    /// Two Pids are equal iff they were issued from the same counter value. A
    /// held Pid may outlive its process, or never have mapped to a live one.
    /// The numeric value is what the execution unit receives on setup.
    Pid,
    NEXT_PID,
    "<0.{}.0>"
);

counter_id!(
    /// Identity of one execution unit, stable across the processes it hosts
    UnitId,
    NEXT_UNIT_ID,
    "unit-{}"
);

counter_id!(
    /// Token tying a request to exactly one reply
    CorrelationId,
    NEXT_CORRELATION_ID,
    "corr-{}"
);

counter_id!(
    /// Handle to a scheduled delayed send
    TimerRef,
    NEXT_TIMER_REF,
    "timer-{}"
);

counter_id!(
    /// Handle to an established monitor
    MonitorRef,
    NEXT_MONITOR_REF,
    "monitor-{}"
);
