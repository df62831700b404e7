//! Tying cache entries to connection lifetimes
//!
//! The cache never owns a connection. It keeps a [`Weak`] per tracked
//! connection and learns that a connection went away in one of two ways:
//!
//! - the owner drops a [`LifecycleHook`] it stored with the connection, or
//! - a periodic sweep finds a `Weak` that no longer upgrades.
//!
//! Either way a [`Cleanup`] message goes through a channel to a reaper task
//! on the runtime that owns the cache. Drops can happen on any thread, and
//! the runtime may already be gone; a failed send simply means there is
//! nothing left to clean up.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identity of a connection, derived from its `Arc` allocation
///
/// While the cache holds a `Weak` to the connection the allocation cannot
/// be reused, so a key never aliases a different live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(usize);

impl ConnectionKey {
    /// Key for the connection behind `connection`
    pub fn of<C: ?Sized>(connection: &Arc<C>) -> Self {
        Self(Arc::as_ptr(connection).cast::<()>() as usize)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:x}", self.0)
    }
}

/// Request to drop the entry bound under `token`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cleanup {
    pub(crate) key: ConnectionKey,
    pub(crate) token: u64,
}

struct Binding<C: ?Sized> {
    connection: Weak<C>,
    token: u64,
}

/// Weak bindings from connection keys to connections
pub(crate) struct LifecycleBinder<C: ?Sized> {
    tracked: DashMap<ConnectionKey, Binding<C>>,
    next_token: AtomicU64,
    reaper: mpsc::UnboundedSender<Cleanup>,
}

impl<C: ?Sized> LifecycleBinder<C> {
    pub(crate) fn new(reaper: mpsc::UnboundedSender<Cleanup>) -> Self {
        Self {
            tracked: DashMap::new(),
            next_token: AtomicU64::new(1),
            reaper,
        }
    }

    /// Track `connection`; returns the binding token, reusing an existing one
    pub(crate) fn bind(&self, connection: &Arc<C>) -> u64 {
        let key = ConnectionKey::of(connection);
        match self.tracked.entry(key) {
            Entry::Occupied(existing) => existing.get().token,
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(Binding {
                    connection: Arc::downgrade(connection),
                    token,
                });
                debug!(connection = %key, token, "Bound connection lifecycle");
                token
            }
        }
    }

    pub(crate) fn unbind(&self, key: ConnectionKey) -> bool {
        self.tracked.remove(&key).is_some()
    }

    pub(crate) fn is_bound(&self, key: ConnectionKey) -> bool {
        self.tracked.contains_key(&key)
    }

    /// Whether `cleanup` refers to the binding currently held for its key
    pub(crate) fn is_current(&self, cleanup: Cleanup) -> bool {
        self.tracked
            .get(&cleanup.key)
            .is_some_and(|binding| binding.token == cleanup.token)
    }

    pub(crate) fn hook(&self, key: ConnectionKey, token: u64) -> LifecycleHook {
        LifecycleHook {
            cleanup: Cleanup { key, token },
            reaper: self.reaper.clone(),
        }
    }

    /// Report every binding whose connection is gone; returns how many
    pub(crate) fn sweep(&self) -> usize {
        let dead: Vec<Cleanup> = self
            .tracked
            .iter()
            .filter(|binding| binding.connection.strong_count() == 0)
            .map(|binding| Cleanup {
                key: *binding.key(),
                token: binding.token,
            })
            .collect();

        for cleanup in &dead {
            trace!(connection = %cleanup.key, "Sweep found unreachable connection");
            let _ = self.reaper.send(*cleanup);
        }
        dead.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.tracked.len()
    }
}

/// Drop guard that releases a connection's cache entry
///
/// Obtained from [`RootsCache::lifecycle_hook`](crate::RootsCache::lifecycle_hook)
/// and stored alongside the connection (for example in its session state).
/// Dropping it schedules removal of the entry on the cache's runtime. It
/// holds neither the connection nor the cache.
#[derive(Debug)]
#[must_use = "dropping the hook releases the connection's roots entry"]
pub struct LifecycleHook {
    cleanup: Cleanup,
    reaper: mpsc::UnboundedSender<Cleanup>,
}

impl LifecycleHook {
    /// Key of the connection this hook releases
    pub fn key(&self) -> ConnectionKey {
        self.cleanup.key
    }
}

impl Drop for LifecycleHook {
    fn drop(&mut self) {
        // The reaper is gone once the owning runtime shut down
        let _ = self.reaper.send(self.cleanup);
    }
}
