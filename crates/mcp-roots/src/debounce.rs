//! Coalescing of `roots/list_changed` bursts

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::lifecycle::ConnectionKey;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

/// At most one pending delayed refresh per connection
///
/// Each schedule gets a fresh generation. A newer schedule aborts the older
/// task, and a task that still wakes up (abort raced with its timer) finds
/// its generation superseded and does nothing.
pub(crate) struct Debouncer {
    delay: Duration,
    pending: DashMap<ConnectionKey, Pending>,
    next_generation: AtomicU64,
}

impl Debouncer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace whatever is pending for `key` with the task `make_task` builds
    pub(crate) fn schedule<F, Fut>(&self, key: ConnectionKey, runtime: &Handle, make_task: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        match self.pending.entry(key) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(Pending {
                    generation,
                    task: runtime.spawn(make_task(generation)),
                });
                previous.task.abort();
                trace!(
                    connection = %key,
                    superseded = previous.generation,
                    generation,
                    "Rescheduled roots refresh"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    generation,
                    task: runtime.spawn(make_task(generation)),
                });
                trace!(connection = %key, generation, "Scheduled roots refresh");
            }
        }
        generation
    }

    pub(crate) fn is_current(&self, key: ConnectionKey, generation: u64) -> bool {
        self.pending
            .get(&key)
            .is_some_and(|pending| pending.generation == generation)
    }

    /// Clear the slot if it still belongs to `generation`
    pub(crate) fn finish(&self, key: ConnectionKey, generation: u64) {
        self.pending
            .remove_if(&key, |_, pending| pending.generation == generation);
    }

    /// Abort the pending refresh for `key`, if any
    pub(crate) fn cancel(&self, key: ConnectionKey) -> bool {
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self, key: ConnectionKey) -> bool {
        self.pending.contains_key(&key)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for pending in self.pending.iter() {
            pending.task.abort();
        }
    }
}
