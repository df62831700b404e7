//! Per-connection roots cache
//!
//! [`RootsCache`] keeps one [`CacheEntry`] per client connection: the
//! current [`Snapshot`] of the client's roots, the [`Guard`] derived from
//! it, and a version that increases whenever the set of root URIs changes.
//!
//! ## Per-connection states
//!
//! ```text
//! absent --open/refresh--> fresh --list_changed--> pending-refresh
//!                            ^                      |   ^
//!                            +----timer + refresh---+   +-- list_changed
//! any --remove / connection dropped--> absent
//! ```
//!
//! ## Concurrency
//!
//! Entries are replaced whole, so readers always see a guard that matches
//! its snapshot. There is no mutual exclusion between an explicit
//! [`RootsCache::refresh`] and a debounced refresh that fires at the same
//! time for the same connection: whichever fetch completes last is stored.
//! Callers that need a stricter order must serialize their own calls.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::RootsConfig;
use crate::cursor;
use crate::debounce::Debouncer;
use crate::error::{RootsError, RootsResult};
use crate::fetch::{RootsClient, fetch_snapshot};
use crate::guard::Guard;
use crate::lifecycle::{Cleanup, ConnectionKey, LifecycleBinder, LifecycleHook};
use crate::snapshot::Snapshot;
use crate::types::{ListRootsResult, ROOTS_LIST_CHANGED_NOTIFICATION};

/// Cached roots state for one connection
#[derive(Debug)]
pub struct CacheEntry {
    version: u64,
    snapshot: Snapshot,
    guard: Arc<Guard>,
}

impl CacheEntry {
    fn new(version: u64, snapshot: Snapshot) -> Self {
        let guard = Arc::new(Guard::new(&snapshot));
        Self {
            version,
            snapshot,
            guard,
        }
    }

    /// Snapshot version, starting at 1
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Roots as last fetched
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Guard built from [`CacheEntry::snapshot`]
    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }
}

struct CacheInner<C: ?Sized> {
    config: RootsConfig,
    entries: DashMap<ConnectionKey, Arc<CacheEntry>>,
    debouncer: Debouncer,
    lifecycle: LifecycleBinder<C>,
    runtime: Option<Handle>,
}

impl<C> CacheInner<C>
where
    C: RootsClient + ?Sized,
{
    async fn refresh(&self, connection: &Arc<C>) -> RootsResult<Snapshot> {
        let fresh = fetch_snapshot(connection.as_ref()).await?;
        Ok(self.store(connection, fresh))
    }

    /// Store `fresh` unless it names the same URIs as the cached snapshot
    ///
    /// Every stored entry is bound to the connection's lifetime first: the
    /// binding's `Weak` keeps the key from being reused by another
    /// allocation while the entry exists.
    fn store(&self, connection: &Arc<C>, fresh: Snapshot) -> Snapshot {
        let key = ConnectionKey::of(connection);
        self.lifecycle.bind(connection);
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().snapshot.same_uris(&fresh) {
                    trace!(connection = %key, version = slot.get().version, "Roots unchanged");
                    return slot.get().snapshot.clone();
                }
                let version = slot.get().version + 1;
                slot.insert(Arc::new(CacheEntry::new(version, fresh.clone())));
                info!(connection = %key, version, roots = fresh.len(), "Roots changed");
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(CacheEntry::new(1, fresh.clone())));
                debug!(connection = %key, roots = fresh.len(), "Cached initial roots");
            }
        }
        fresh
    }

    fn remove_key(&self, key: ConnectionKey) -> bool {
        let cancelled = self.debouncer.cancel(key);
        let removed = self.entries.remove(&key).is_some();
        // Unbind last; the binding's Weak reserves the key until the entry is gone
        self.lifecycle.unbind(key);
        if removed || cancelled {
            debug!(connection = %key, cancelled, "Removed roots entry");
        }
        removed
    }

    fn reap(&self, cleanup: Cleanup) {
        if self.lifecycle.is_current(cleanup) {
            debug!(connection = %cleanup.key, "Connection gone, releasing roots entry");
            self.remove_key(cleanup.key);
        }
    }

    fn version_of(&self, key: ConnectionKey) -> u64 {
        self.entries.get(&key).map_or(0, |entry| entry.version)
    }
}

/// Roots cache shared by all connections of a server
///
/// Cloning is cheap and clones share state. `C` is the connection type; it
/// is also the [`RootsClient`] used to fetch that connection's roots.
///
/// Background work (debounced refreshes, reaping of dropped connections)
/// runs on the Tokio runtime that was current when the cache was created.
/// A cache created outside a runtime still serves reads and explicit
/// refreshes, but dropped connections must then be removed with
/// [`RootsCache::remove`].
pub struct RootsCache<C: ?Sized> {
    inner: Arc<CacheInner<C>>,
}

impl<C: ?Sized> Clone for RootsCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ?Sized> fmt::Debug for RootsCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootsCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.len())
            .field("tracked", &self.inner.lifecycle.len())
            .finish()
    }
}

impl<C> Default for RootsCache<C>
where
    C: RootsClient + ?Sized + 'static,
{
    fn default() -> Self {
        Self::new(RootsConfig::default())
    }
}

impl<C> RootsCache<C>
where
    C: RootsClient + ?Sized + 'static,
{
    /// Create a cache and start its background tasks on the current runtime
    pub fn new(config: RootsConfig) -> Self {
        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        let runtime = Handle::try_current().ok();
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            debouncer: Debouncer::new(config.debounce),
            lifecycle: LifecycleBinder::new(reaper_tx),
            runtime: runtime.clone(),
            config,
        });

        match runtime {
            Some(handle) => {
                spawn_reaper(&handle, Arc::downgrade(&inner), reaper_rx);
                if !inner.config.sweep_interval.is_zero() {
                    spawn_sweeper(&handle, Arc::downgrade(&inner), inner.config.sweep_interval);
                }
            }
            None => warn!(
                "Roots cache created outside a Tokio runtime; closed connections must be removed explicitly"
            ),
        }

        Self { inner }
    }

    /// Configuration in effect
    pub fn config(&self) -> &RootsConfig {
        &self.inner.config
    }

    /// Fetch the connection's roots and update its entry if they changed
    ///
    /// Returns the snapshot now cached. An unchanged result keeps the
    /// existing entry, version and guard included. A stored entry is tied
    /// to the connection's lifetime like one created by
    /// [`RootsCache::on_session_open`].
    ///
    /// # Errors
    ///
    /// Propagates [`RootsError::ProtocolResponse`] and any error from the
    /// connection's `roots/list` round trip; the cached entry is untouched.
    pub async fn refresh(&self, connection: &Arc<C>) -> RootsResult<Snapshot> {
        self.inner.refresh(connection).await
    }

    /// Load roots for a newly opened session and start tracking its lifetime
    ///
    /// # Errors
    ///
    /// Same as [`RootsCache::refresh`]; on error the connection is not tracked.
    pub async fn on_session_open(&self, connection: &Arc<C>) -> RootsResult<Snapshot> {
        let snapshot = self.refresh(connection).await?;
        debug!(
            connection = %ConnectionKey::of(connection),
            roots = snapshot.len(),
            "Session roots loaded"
        );
        Ok(snapshot)
    }

    /// Handle `notifications/roots/list_changed` for the connection
    ///
    /// Any refresh already pending is cancelled and a new one is scheduled
    /// after the configured quiet period, so a burst of notifications
    /// results in a single `roots/list` round trip.
    pub fn on_list_changed(&self, connection: &Arc<C>) {
        let key = ConnectionKey::of(connection);
        let Some(runtime) = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            warn!(connection = %key, "No runtime available, dropping roots change notification");
            return;
        };

        let inner = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(connection);
        let delay = self.inner.debouncer.delay();
        self.inner.debouncer.schedule(key, &runtime, move |generation| {
            debounced_refresh(inner, target, key, generation, delay)
        });
    }

    /// Route a client notification; returns whether it was handled
    pub fn handle_notification(&self, connection: &Arc<C>, method: &str) -> bool {
        if method == ROOTS_LIST_CHANGED_NOTIFICATION {
            self.on_list_changed(connection);
            true
        } else {
            false
        }
    }

    /// Drop guard that releases the connection's entry when dropped
    ///
    /// Starts tracking the connection if it is not tracked yet. Store the
    /// hook with the connection so the entry goes away as soon as the
    /// connection does, instead of at the next sweep.
    pub fn lifecycle_hook(&self, connection: &Arc<C>) -> LifecycleHook {
        let token = self.inner.lifecycle.bind(connection);
        self.inner
            .lifecycle
            .hook(ConnectionKey::of(connection), token)
    }

    /// Current entry, for reading version, snapshot and guard consistently
    pub fn entry(&self, connection: &Arc<C>) -> Option<Arc<CacheEntry>> {
        self.entry_by_key(ConnectionKey::of(connection))
    }

    /// Current entry by key
    pub fn entry_by_key(&self, key: ConnectionKey) -> Option<Arc<CacheEntry>> {
        self.inner
            .entries
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Guard for the connection; denies everything when untracked
    pub fn guard(&self, connection: &Arc<C>) -> Arc<Guard> {
        self.entry(connection)
            .map(|entry| Arc::clone(&entry.guard))
            .unwrap_or_default()
    }

    /// Snapshot for the connection; empty when untracked
    pub fn snapshot(&self, connection: &Arc<C>) -> Snapshot {
        self.entry(connection)
            .map(|entry| entry.snapshot.clone())
            .unwrap_or_default()
    }

    /// Snapshot version for the connection; 0 when untracked
    pub fn version(&self, connection: &Arc<C>) -> u64 {
        self.inner.version_of(ConnectionKey::of(connection))
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.inner.entries.contains_key(&key)
    }

    /// Whether the connection's lifetime is being tracked
    pub fn is_tracked(&self, key: ConnectionKey) -> bool {
        self.inner.lifecycle.is_bound(key)
    }

    /// Whether a debounced refresh is waiting or running for the connection
    pub fn is_refresh_pending(&self, connection: &Arc<C>) -> bool {
        self.inner
            .debouncer
            .is_pending(ConnectionKey::of(connection))
    }

    /// Keys of all cached connections
    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.inner.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of cached connections
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no connection is cached
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Forget the connection; returns whether an entry existed
    ///
    /// Cancels any pending debounced refresh and stops lifetime tracking.
    /// Removing an unknown connection is a no-op.
    pub fn remove(&self, connection: &Arc<C>) -> bool {
        self.remove_key(ConnectionKey::of(connection))
    }

    /// [`RootsCache::remove`] by key, for when the connection itself is gone
    pub fn remove_key(&self, key: ConnectionKey) -> bool {
        self.inner.remove_key(key)
    }

    /// Cursor pointing at `offset` in the connection's current snapshot
    pub fn encode_cursor(&self, connection: &Arc<C>, offset: usize) -> String {
        cursor::encode(self.version(connection), offset as u64)
    }

    /// Decode a cursor into `(version, offset)` against the current version
    ///
    /// No cursor means the start of the current snapshot.
    ///
    /// # Errors
    ///
    /// - [`RootsError::InvalidCursor`] if the token is malformed
    /// - [`RootsError::StaleCursor`] if it was issued for another version;
    ///   pagination must restart from the beginning
    /// - [`RootsError::InvalidOffset`] if the offset is negative
    pub fn decode_cursor(
        &self,
        connection: &Arc<C>,
        cursor: Option<&str>,
    ) -> RootsResult<(u64, usize)> {
        decode_against(self.version(connection), cursor)
    }

    /// Serve one page of the cached roots
    ///
    /// The cursor is validated against the same entry that is sliced, so a
    /// refresh landing between pages yields [`RootsError::StaleCursor`]
    /// rather than a page from a different snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`RootsCache::decode_cursor`].
    pub fn list_page(
        &self,
        connection: &Arc<C>,
        cursor: Option<&str>,
    ) -> RootsResult<ListRootsResult> {
        let (version, snapshot) = match self.entry(connection) {
            Some(entry) => (entry.version, entry.snapshot.clone()),
            None => (0, Snapshot::empty()),
        };
        let (_, offset) = decode_against(version, cursor)?;

        let roots = snapshot.roots();
        let start = offset.min(roots.len());
        let end = start
            .saturating_add(self.inner.config.page_size.max(1))
            .min(roots.len());
        let next_cursor = (end < roots.len()).then(|| cursor::encode(version, end as u64));

        Ok(ListRootsResult {
            roots: roots[start..end].to_vec(),
            next_cursor,
        })
    }
}

fn decode_against(current: u64, cursor: Option<&str>) -> RootsResult<(u64, usize)> {
    let Some(token) = cursor else {
        return Ok((current, 0));
    };
    let (received, offset) = cursor::decode(token)?;
    if received != current {
        return Err(RootsError::StaleCursor {
            expected: current,
            received,
        });
    }
    let offset = usize::try_from(offset).map_err(|_| RootsError::InvalidOffset(offset))?;
    Ok((current, offset))
}

async fn debounced_refresh<C>(
    inner: Weak<CacheInner<C>>,
    connection: Weak<C>,
    key: ConnectionKey,
    generation: u64,
    delay: Duration,
) where
    C: RootsClient + ?Sized,
{
    tokio::time::sleep(delay).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    if !inner.debouncer.is_current(key, generation) {
        return;
    }

    match connection.upgrade() {
        Some(connection) => match inner.refresh(&connection).await {
            Ok(snapshot) => debug!(
                connection = %key,
                version = inner.version_of(key),
                roots = snapshot.len(),
                "Debounced roots refresh completed"
            ),
            Err(e) => warn!(connection = %key, error = %e, "Debounced roots refresh failed"),
        },
        None => trace!(connection = %key, "Connection gone before debounced refresh"),
    }

    inner.debouncer.finish(key, generation);
}

fn spawn_reaper<C>(
    runtime: &Handle,
    inner: Weak<CacheInner<C>>,
    mut cleanups: mpsc::UnboundedReceiver<Cleanup>,
) where
    C: RootsClient + ?Sized + 'static,
{
    runtime.spawn(async move {
        while let Some(cleanup) = cleanups.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.reap(cleanup);
        }
        trace!("Roots reaper stopped");
    });
}

fn spawn_sweeper<C>(runtime: &Handle, inner: Weak<CacheInner<C>>, period: Duration)
where
    C: RootsClient + ?Sized + 'static,
{
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let dead = inner.lifecycle.sweep();
            if dead > 0 {
                debug!(dead, "Sweep queued unreachable connections for cleanup");
            }
        }
        trace!("Roots sweeper stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListRootsParams, Root};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedRoots(Mutex<Vec<&'static str>>);

    impl FixedRoots {
        fn new(uris: &[&'static str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(uris.to_vec())))
        }

        fn set(&self, uris: &[&'static str]) {
            *self.0.lock().unwrap() = uris.to_vec();
        }
    }

    #[async_trait]
    impl RootsClient for FixedRoots {
        async fn list_roots(
            &self,
            _params: Option<ListRootsParams>,
        ) -> RootsResult<serde_json::Value> {
            let uris = self.0.lock().unwrap().clone();
            let roots: Vec<_> = uris.iter().map(|uri| json!({ "uri": uri })).collect();
            Ok(json!({ "roots": roots }))
        }
    }

    #[test]
    fn test_readers_on_untracked_connection() {
        let cache: RootsCache<FixedRoots> = RootsCache::new(RootsConfig::default());
        let conn = FixedRoots::new(&["file:///a"]);

        assert_eq!(cache.version(&conn), 0);
        assert!(cache.snapshot(&conn).is_empty());
        assert!(cache.guard(&conn).is_empty());
        assert!(!cache.guard(&conn).within("/a"));
        assert!(cache.entry(&conn).is_none());
        assert!(!cache.remove(&conn));
    }

    #[test]
    fn test_decode_without_cursor_starts_at_zero() {
        assert_eq!(decode_against(3, None).unwrap(), (3, 0));
    }

    #[test]
    fn test_decode_checks_version_before_offset() {
        let token = raw_cursor(r#"{"v": 1, "o": -1}"#);
        assert_eq!(
            decode_against(2, Some(&token)),
            Err(RootsError::StaleCursor {
                expected: 2,
                received: 1
            })
        );
        assert_eq!(
            decode_against(1, Some(&token)),
            Err(RootsError::InvalidOffset(-1))
        );
    }

    fn raw_cursor(json: &str) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    #[tokio::test]
    async fn test_unchanged_refresh_keeps_entry() {
        let cache = RootsCache::new(RootsConfig::default());
        let conn = FixedRoots::new(&["file:///b", "file:///a"]);

        cache.refresh(&conn).await.unwrap();
        let first = cache.entry(&conn).unwrap();
        cache.refresh(&conn).await.unwrap();
        let second = cache.entry(&conn).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.version(), 1);
    }

    #[tokio::test]
    async fn test_changed_refresh_rebuilds_guard() {
        let cache = RootsCache::new(RootsConfig::default());
        let conn = FixedRoots::new(&["file:///nonexistent-root/a"]);

        cache.refresh(&conn).await.unwrap();
        let before = cache.guard(&conn);
        conn.set(&["file:///nonexistent-root/b"]);
        cache.refresh(&conn).await.unwrap();
        let after = cache.guard(&conn);

        assert_eq!(cache.version(&conn), 2);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            cache.snapshot(&conn).roots(),
            [Root::new("file:///nonexistent-root/b")]
        );
    }

    #[tokio::test]
    async fn test_list_page_walks_snapshot() {
        let cache = RootsCache::new(RootsConfig::default().page_size(2));
        let conn = FixedRoots::new(&["file:///c", "file:///a", "file:///b"]);
        cache.refresh(&conn).await.unwrap();

        let first = cache.list_page(&conn, None).unwrap();
        assert_eq!(first.roots.len(), 2);
        assert_eq!(first.roots[0].uri, "file:///a");

        let second = cache
            .list_page(&conn, first.next_cursor.as_deref())
            .unwrap();
        assert_eq!(second.roots, vec![Root::new("file:///c")]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_page_past_end_is_empty() {
        let cache = RootsCache::new(RootsConfig::default());
        let conn = FixedRoots::new(&["file:///a"]);
        cache.refresh(&conn).await.unwrap();

        let cursor = cache.encode_cursor(&conn, 10);
        let page = cache.list_page(&conn, Some(&cursor)).unwrap();
        assert!(page.roots.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_handle_notification_routes_list_changed() {
        let cache = RootsCache::new(RootsConfig::default());
        let conn = FixedRoots::new(&["file:///a"]);

        assert!(!cache.handle_notification(&conn, "notifications/progress"));
        assert!(!cache.is_refresh_pending(&conn));
        assert!(cache.handle_notification(&conn, ROOTS_LIST_CHANGED_NOTIFICATION));
        assert!(cache.is_refresh_pending(&conn));

        cache.remove(&conn);
        assert!(!cache.is_refresh_pending(&conn));
    }
}
