//! Selectors
//!
//! A [`Selector`] merges several event sources (process replies, monitor
//! resolutions, direct posts) into one typed stream. Every posted value is
//! fanned out to the selector's listeners in subscription order and queued
//! for [`Selector::select`], which consumes one value at a time.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Handle to a selector listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    queue: mpsc::UnboundedSender<T>,
    pending: tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>,
}

/// Fan-in point for many event sources
pub struct Selector<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("listeners", &self.shared.listeners.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Selector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Selector<T> {
    pub fn new() -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                listeners: Mutex::new(Vec::new()),
                queue,
                pending: tokio::sync::Mutex::new(pending),
            }),
        }
    }

    /// Fan `value` out to every listener, then queue it for `select`
    pub fn post_message(&self, value: T) {
        let listeners: Vec<Listener<T>> = self
            .shared
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&value);
        }
        let _ = self.shared.queue.send(value);
    }

    pub fn add_listener(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Next value posted, or `None` if `within` elapses first
    pub async fn select(&self, within: Duration) -> Option<T> {
        let mut pending = self.shared.pending.lock().await;
        tokio::time::timeout(within, pending.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next value posted, waiting as long as it takes
    pub async fn select_forever(&self) -> T {
        let mut pending = self.shared.pending.lock().await;
        match pending.recv().await {
            Some(value) => value,
            // the selector holds its own sender, so the queue never closes
            None => std::future::pending().await,
        }
    }

    /// A value already queued, without waiting
    pub fn try_select(&self) -> Option<T> {
        self.shared.pending.try_lock().ok()?.try_recv().ok()
    }
}
