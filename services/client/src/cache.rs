//! services/client/src/cache.rs
//!
//! The Query Cache: server-derived values keyed by (resource, parameters),
//! served stale-while-revalidate, deduplicated while in flight and
//! invalidated by resource after mutations.
//!
//! # Entry lifecycle
//!
//! Every fetch gets a unique ticket. Only the fetch whose ticket the entry
//! still holds may install its result, so invalidation and identity changes
//! simply forget the ticket and late results fall on the floor.
//!
//! An invalidated entry never serves its old value again: readers wait for
//! the re-fetch instead.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::session::SessionSnapshot;

//=========================================================================================
// Configuration and Keys
//=========================================================================================

/// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Staleness window of single books and book lists
    pub books_stale_after: Duration,
    /// Staleness window of the bookmark list
    pub bookmarks_stale_after: Duration,
    /// Staleness window of the category list
    pub categories_stale_after: Duration,
    /// Staleness window of user lists and profiles
    pub users_stale_after: Duration,
    /// Idle entries without subscribers are evicted after this long
    pub gc_after: Duration,
    /// How often a retryable fetch failure is retried
    pub retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            books_stale_after: Duration::from_secs(60),
            bookmarks_stale_after: Duration::from_secs(30),
            categories_stale_after: Duration::from_secs(300),
            users_stale_after: Duration::from_secs(60),
            gc_after: Duration::from_secs(30 * 60),
            retries: 1,
        }
    }
}

/// The logical resource a cache key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryResource {
    Book,
    Books,
    CategoryBooks,
    Categories,
    Bookmarks,
    Users,
    Profile,
}

impl QueryResource {
    pub fn name(&self) -> &'static str {
        match self {
            QueryResource::Book => "book",
            QueryResource::Books => "books",
            QueryResource::CategoryBooks => "category_books",
            QueryResource::Categories => "categories",
            QueryResource::Bookmarks => "bookmarks",
            QueryResource::Users => "users",
            QueryResource::Profile => "profile",
        }
    }

    pub fn stale_after(&self, config: &CacheConfig) -> Duration {
        match self {
            QueryResource::Book | QueryResource::Books | QueryResource::CategoryBooks => {
                config.books_stale_after
            }
            QueryResource::Bookmarks => config.bookmarks_stale_after,
            QueryResource::Categories => config.categories_stale_after,
            QueryResource::Users | QueryResource::Profile => config.users_stale_after,
        }
    }
}

/// Resource name plus an ordered parameter tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: QueryResource,
    params: Vec<String>,
}

impl CacheKey {
    pub fn new(resource: QueryResource) -> Self {
        Self {
            resource,
            params: Vec::new(),
        }
    }

    pub fn with(mut self, param: impl ToString) -> Self {
        self.params.push(param.to_string());
        self
    }

    pub fn resource(&self) -> QueryResource {
        self.resource
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource.name(), self.params.join(", "))
    }
}

//=========================================================================================
// Entry State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Fresh,
    Stale,
    Fetching,
    Error,
}

type Value = Arc<dyn Any + Send + Sync>;
type FetchFuture = BoxFuture<'static, Result<Value, RequestError>>;
type SharedFetch = Shared<FetchFuture>;
type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// What subscribers of an entry observe.
#[derive(Clone)]
pub struct QueryState {
    pub status: EntryStatus,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<RequestError>,
    value: Option<Value>,
}

impl QueryState {
    fn empty() -> Self {
        Self {
            status: EntryStatus::Stale,
            fetched_at: None,
            error: None,
            value: None,
        }
    }
}

impl fmt::Debug for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("status", &self.status)
            .field("fetched_at", &self.fetched_at)
            .field("error", &self.error)
            .field("has_value", &self.value.is_some())
            .finish()
    }
}

struct Entry {
    value: Option<Value>,
    fetched_at: Option<Instant>,
    fetched_wall: Option<DateTime<Utc>>,
    status: EntryStatus,
    error: Option<RequestError>,
    invalidated: bool,
    /// Ticket of the fetch allowed to install its result; 0 means none.
    ticket: u64,
    inflight: Option<SharedFetch>,
    fetcher: Option<Fetcher>,
    last_read: Instant,
    notify: watch::Sender<QueryState>,
}

enum Lookup {
    Fresh(Value),
    Stale(Value),
    Wait,
}

impl Entry {
    fn new(now: Instant) -> Self {
        let (notify, _) = watch::channel(QueryState::empty());
        Self {
            value: None,
            fetched_at: None,
            fetched_wall: None,
            status: EntryStatus::Stale,
            error: None,
            invalidated: false,
            ticket: 0,
            inflight: None,
            fetcher: None,
            last_read: now,
            notify,
        }
    }

    fn lookup(&self, stale_after: Duration, now: Instant) -> Lookup {
        match (&self.value, self.fetched_at) {
            (Some(value), Some(at)) if !self.invalidated => {
                if now.duration_since(at) < stale_after {
                    Lookup::Fresh(value.clone())
                } else {
                    Lookup::Stale(value.clone())
                }
            }
            _ => Lookup::Wait,
        }
    }

    fn observed(&self) -> bool {
        self.notify.receiver_count() > 0
    }

    /// Drops the value and forgets any in-flight fetch.
    fn reset(&mut self) {
        self.value = None;
        self.fetched_at = None;
        self.fetched_wall = None;
        self.error = None;
        self.invalidated = false;
        self.ticket = 0;
        self.inflight = None;
        self.status = EntryStatus::Stale;
    }

    fn publish(&self) {
        self.notify.send_replace(QueryState {
            status: self.status,
            fetched_at: self.fetched_wall,
            error: self.error.clone(),
            value: self.value.clone(),
        });
    }
}

//=========================================================================================
// The Cache
//=========================================================================================

struct CacheInner {
    config: CacheConfig,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    next_ticket: AtomicU64,
    identity: Option<watch::Receiver<SessionSnapshot>>,
    seen_epoch: AtomicU64,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs the result of the fetch holding `ticket`, if it still does.
    fn complete(&self, key: &CacheKey, ticket: u64, result: &Result<Value, RequestError>) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            debug!(key = %key, "Dropping result for an evicted entry");
            return;
        };
        if entry.ticket != ticket {
            debug!(key = %key, "Dropping result of a superseded fetch");
            return;
        }
        entry.inflight = None;
        entry.ticket = 0;
        match result {
            Ok(value) => {
                entry.value = Some(value.clone());
                entry.fetched_at = Some(Instant::now());
                entry.fetched_wall = Some(Utc::now());
                entry.status = EntryStatus::Fresh;
                entry.error = None;
                entry.invalidated = false;
                debug!(key = %key, "Cache entry refreshed");
            }
            Err(e) => {
                entry.status = EntryStatus::Error;
                entry.error = Some(e.clone());
                warn!(key = %key, error = %e, "Cache fetch failed");
            }
        }
        entry.publish();
    }
}

/// A cloneable handle on one shared cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// A cache that drops everything whenever the session identity changes.
    pub fn following(config: CacheConfig, identity: watch::Receiver<SessionSnapshot>) -> Self {
        Self::build(config, Some(identity))
    }

    fn build(config: CacheConfig, identity: Option<watch::Receiver<SessionSnapshot>>) -> Self {
        let seen_epoch = identity.as_ref().map(|rx| rx.borrow().epoch).unwrap_or_default();
        Self {
            inner: Arc::new(CacheInner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                identity,
                seen_epoch: AtomicU64::new(seen_epoch),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Reads `key`, fetching with `fetch` when there is no usable value.
    ///
    /// Fresh values are returned as is. Stale values are returned at once
    /// while a background re-fetch runs. Without a value the call waits for
    /// the fetch, joining one that is already in flight.
    pub async fn fetch<T, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Arc<T>, RequestError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let pending = fetch();
            async move { pending.await.map(|value| Arc::new(value) as Value) }.boxed()
        });

        let pending = {
            let mut entries = self.inner.lock();
            let now = Instant::now();
            self.sync_identity(&mut entries);
            self.collect_garbage(&mut entries, now);

            let stale_after = key.resource().stale_after(&self.inner.config);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now));
            entry.fetcher = Some(fetcher);
            entry.last_read = now;

            match entry.lookup(stale_after, now) {
                Lookup::Fresh(value) => return downcast(&key, value),
                Lookup::Stale(value) => {
                    if entry.inflight.is_none() {
                        debug!(key = %key, "Serving stale value, revalidating");
                        let revalidation = self.start(&key, entry);
                        spawn_detached(revalidation);
                    }
                    return downcast(&key, value);
                }
                Lookup::Wait => match &entry.inflight {
                    Some(inflight) => inflight.clone(),
                    None => self.start(&key, entry),
                },
            }
        };

        let value = pending.await?;
        downcast(&key, value)
    }

    /// Starts a fetch for `entry` with the entry's current fetcher.
    fn start(&self, key: &CacheKey, entry: &mut Entry) -> SharedFetch {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        let fetcher = entry.fetcher.clone();
        let inner = Arc::clone(&self.inner);
        let retries = self.inner.config.retries;
        let task_key = key.clone();

        let shared = async move {
            let result = match fetcher {
                Some(fetcher) => {
                    let mut attempt = 0;
                    loop {
                        match fetcher().await {
                            Err(e) if e.is_retryable() && attempt < retries => {
                                attempt += 1;
                                warn!(key = %task_key, attempt, error = %e, "Retrying fetch");
                            }
                            other => break other,
                        }
                    }
                }
                None => Err(RequestError::Protocol(format!("no fetcher registered for {}", task_key))),
            };
            inner.complete(&task_key, ticket, &result);
            result
        }
        .boxed()
        .shared();

        entry.ticket = ticket;
        entry.inflight = Some(shared.clone());
        entry.status = EntryStatus::Fetching;
        entry.publish();
        shared
    }

    /// Marks every entry of `resource` as invalid. Observed entries are
    /// re-fetched right away; the others on their next read.
    pub fn invalidate(&self, resource: QueryResource) -> usize {
        self.invalidate_all(&[resource])
    }

    pub fn invalidate_all(&self, resources: &[QueryResource]) -> usize {
        let mut entries = self.inner.lock();
        let mut count = 0;
        for (key, entry) in entries.iter_mut() {
            if !resources.contains(&key.resource()) {
                continue;
            }
            count += 1;
            entry.invalidated = true;
            entry.ticket = 0;
            entry.inflight = None;
            entry.status = EntryStatus::Stale;
            if entry.observed() && entry.fetcher.is_some() && tokio::runtime::Handle::try_current().is_ok() {
                let refetch = self.start(key, entry);
                spawn_detached(refetch);
            } else {
                entry.publish();
            }
        }
        debug!(resources = ?resources.iter().map(|r| r.name()).collect::<Vec<_>>(), count, "Cache invalidated");
        count
    }

    /// Forgets all values. Subscribed entries are kept, emptied.
    pub fn clear(&self) {
        let mut entries = self.inner.lock();
        Self::clear_locked(&mut entries);
    }

    fn clear_locked(entries: &mut HashMap<CacheKey, Entry>) {
        entries.retain(|_, entry| entry.observed());
        for entry in entries.values_mut() {
            entry.reset();
            entry.publish();
        }
    }

    fn sync_identity(&self, entries: &mut HashMap<CacheKey, Entry>) {
        let Some(identity) = &self.inner.identity else {
            return;
        };
        let epoch = identity.borrow().epoch;
        if self.inner.seen_epoch.swap(epoch, Ordering::AcqRel) != epoch {
            debug!(epoch, "Session identity changed, clearing cache");
            Self::clear_locked(entries);
        }
    }

    fn collect_garbage(&self, entries: &mut HashMap<CacheKey, Entry>, now: Instant) {
        let gc_after = self.inner.config.gc_after;
        entries.retain(|key, entry| {
            let keep = entry.observed()
                || entry.inflight.is_some()
                || now.duration_since(entry.last_read) < gc_after;
            if !keep {
                debug!(key = %key, "Evicting idle cache entry");
            }
            keep
        });
    }

    //-------------------------------------------------------------------------------------
    // Inspection
    //-------------------------------------------------------------------------------------

    /// The cached value of `key` regardless of freshness, without fetching.
    /// Invalidated values are not returned.
    pub fn peek<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let entries = self.inner.lock();
        let entry = entries.get(key).filter(|e| !e.invalidated)?;
        entry.value.clone().and_then(|value| value.downcast::<T>().ok())
    }

    pub fn status(&self, key: &CacheKey) -> Option<EntryStatus> {
        self.inner.lock().get(key).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observes the state of `key`. While a subscription is alive the entry is
    /// never evicted and is re-fetched eagerly on invalidation.
    pub fn subscribe<T: Send + Sync + 'static>(&self, key: CacheKey) -> Subscription<T> {
        let mut entries = self.inner.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(Instant::now()));
        Subscription {
            key,
            rx: entry.notify.subscribe(),
            _marker: PhantomData,
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey, value: Value) -> Result<Arc<T>, RequestError> {
    value
        .downcast::<T>()
        .map_err(|_| RequestError::Protocol(format!("cached value of {} has another type", key)))
}

fn spawn_detached(fetch: SharedFetch) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            let _ = fetch.await;
        });
    }
}

//=========================================================================================
// Subscriptions
//=========================================================================================

/// A typed snapshot of a cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub status: EntryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<RequestError>,
    pub fetched_at: Option<DateTime<Utc>>,
}

pub struct Subscription<T> {
    key: CacheKey,
    rx: watch::Receiver<QueryState>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn current(&self) -> QuerySnapshot<T> {
        let state = self.rx.borrow().clone();
        QuerySnapshot {
            status: state.status,
            data: state.value.and_then(|value| value.downcast::<T>().ok()),
            error: state.error,
            fetched_at: state.fetched_at,
        }
    }

    /// Waits for the next change of the entry. Fails once the entry is gone.
    pub async fn changed(&mut self) -> Result<QuerySnapshot<T>, RequestError> {
        self.rx
            .changed()
            .await
            .map_err(|_| RequestError::Protocol(format!("cache entry {} was dropped", self.key)))?;
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn quick() -> CacheConfig {
        CacheConfig {
            retries: 0,
            ..CacheConfig::default()
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, delay: Duration) -> impl Fn() -> BoxFuture<'static, Result<usize, RequestError>> + Send + Sync + 'static {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            }
            .boxed()
        }
    }

    fn bookmarks() -> CacheKey {
        CacheKey::new(QueryResource::Bookmarks)
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.fetch(bookmarks(), counting(&calls, Duration::from_millis(20))),
            cache.fetch(bookmarks(), counting(&calls, Duration::from_millis(20))),
            cache.fetch(bookmarks(), counting(&calls, Duration::from_millis(20))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*a.unwrap(), 1);
        assert_eq!(*b.unwrap(), 1);
        assert_eq!(*c.unwrap(), 1);
    }

    #[tokio::test]
    async fn fresh_values_are_served_without_fetching() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        let again = cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();

        assert_eq!(*again, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(&bookmarks()), Some(EntryStatus::Fresh));
    }

    #[tokio::test]
    async fn distinct_parameters_are_distinct_entries() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));
        let page = |n: u32| CacheKey::new(QueryResource::Books).with(n).with("").with("");

        cache.fetch(page(1), counting(&calls, Duration::ZERO)).await.unwrap();
        cache.fetch(page(2), counting(&calls, Duration::ZERO)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn stale_values_are_served_while_revalidating() {
        let cache = QueryCache::new(CacheConfig {
            bookmarks_stale_after: Duration::ZERO,
            ..quick()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sub = cache.subscribe::<usize>(bookmarks());

        let first = cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        let second = cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(*first, 1);
        assert_eq!(*second, 1, "stale value is returned immediately");

        // Wait for the background revalidation to land.
        loop {
            let snapshot = sub.changed().await.unwrap();
            if snapshot.data.as_deref() == Some(&2) {
                assert_eq!(snapshot.status, EntryStatus::Fresh);
                break;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidated_entries_never_serve_the_old_value() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));
        let categories = CacheKey::new(QueryResource::Categories);

        cache.fetch(categories.clone(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(cache.invalidate(QueryResource::Categories), 1);
        assert!(cache.peek::<usize>(&categories).is_none());

        let after = cache.fetch(categories, counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(*after, 2);
    }

    #[tokio::test]
    async fn invalidation_is_scoped_to_the_resource() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        cache
            .fetch(CacheKey::new(QueryResource::Books).with(1), counting(&calls, Duration::ZERO))
            .await
            .unwrap();
        cache
            .fetch(CacheKey::new(QueryResource::Books).with(2), counting(&calls, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(cache.invalidate(QueryResource::Books), 2);
        assert_eq!(cache.status(&bookmarks()), Some(EntryStatus::Fresh));
    }

    #[tokio::test]
    async fn observed_entries_refetch_on_invalidation() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sub = cache.subscribe::<usize>(bookmarks());

        cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        cache.invalidate(QueryResource::Bookmarks);

        loop {
            let snapshot = sub.changed().await.unwrap();
            if snapshot.status == EntryStatus::Fresh {
                assert_eq!(snapshot.data.as_deref(), Some(&2));
                break;
            }
        }
    }

    #[tokio::test]
    async fn a_fetch_started_before_invalidation_is_not_installed() {
        let cache = QueryCache::new(quick());
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = cache.fetch(bookmarks(), counting(&calls, Duration::from_millis(30)));
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cache.invalidate(QueryResource::Bookmarks);
        };
        let (slow, _) = tokio::join!(slow, invalidate);
        assert_eq!(*slow.unwrap(), 1);

        assert!(cache.peek::<usize>(&bookmarks()).is_none());
        let after = cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        assert_eq!(*after, 2);
    }

    #[tokio::test]
    async fn failures_are_reported_and_retried_on_next_read() {
        let cache = QueryCache::new(quick());
        let attempts = Arc::new(AtomicUsize::new(0));
        let failing = {
            let attempts = attempts.clone();
            move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<usize, _>(RequestError::Business("nope".to_string())) }
            }
        };

        let err = cache.fetch(bookmarks(), failing.clone()).await.unwrap_err();
        assert_eq!(err, RequestError::Business("nope".to_string()));
        assert_eq!(cache.status(&bookmarks()), Some(EntryStatus::Error));

        cache.fetch(bookmarks(), failing).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried() {
        let cache = QueryCache::new(CacheConfig {
            retries: 1,
            ..CacheConfig::default()
        });
        let attempts = Arc::new(AtomicUsize::new(0));
        let flaky = {
            let attempts = attempts.clone();
            move || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RequestError::Transport("reset".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            }
        };

        assert_eq!(*cache.fetch(bookmarks(), flaky).await.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn identity_change_clears_cached_values() {
        let (tx, rx) = watch::channel(SessionSnapshot {
            user: None,
            loading: false,
            epoch: 1,
        });
        let cache = QueryCache::following(quick(), rx);
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        tx.send_modify(|snapshot| snapshot.epoch = 2);
        let after = cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();

        assert_eq!(*after, 2);
    }

    #[tokio::test]
    async fn idle_unobserved_entries_are_evicted() {
        let cache = QueryCache::new(CacheConfig {
            gc_after: Duration::ZERO,
            ..quick()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        cache.fetch(bookmarks(), counting(&calls, Duration::ZERO)).await.unwrap();
        cache
            .fetch(CacheKey::new(QueryResource::Categories), counting(&calls, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(cache.status(&bookmarks()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_render_resource_and_parameters() {
        let key = CacheKey::new(QueryResource::Books).with(1).with("dune").with("");
        assert_eq!(key.to_string(), "books[1, dune, ]");
        assert_eq!(key.params().len(), 3);
    }
}
