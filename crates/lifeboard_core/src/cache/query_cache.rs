//! Key -> result cache with fetch deduplication and auditable
//! invalidation.
//!
//! # Responsibility
//! - Serve reads from the last-known result while a single shared fetch
//!   refreshes it.
//! - Re-establish a server-confirmed snapshot after every invalidation.
//!
//! # Invariants
//! - One in-flight fetch per key; concurrent callers join it.
//! - A fetch started before an invalidation never clears the stale flag
//!   (generation counter), so racing refetch paths always converge on a
//!   post-invalidation snapshot.
//! - Fetches run to completion even when every caller goes away; the
//!   populated entry is kept for fast remounts.

use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Why a key was invalidated. Recorded in metrics and logs so every
/// refetch can be traced back to its trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationCause {
    /// The owning feature completed a mutation.
    Mutation,
    /// The change feed observed a remote mutation.
    ChangeFeed,
    /// Explicit refresh requested by the embedder.
    Manual,
}

impl Display for InvalidationCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mutation => write!(f, "mutation"),
            Self::ChangeFeed => write!(f, "change_feed"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Per-entry counters exposed for invalidation auditing and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMetrics {
    pub fetches_started: u64,
    pub invalidations: u64,
}

pub type FetchFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Fetch factory registered per key; invoked for every real refetch.
pub type QueryFetcher<T, E> = Arc<dyn Fn() -> FetchFuture<T, E> + Send + Sync>;

struct Entry<T, E> {
    value: Option<T>,
    /// True until a fetch that started after the latest invalidation
    /// completes. A fresh entry is stale by definition.
    stale: bool,
    generation: u64,
    subscribers: usize,
    in_flight: Option<(u64, broadcast::Sender<Result<T, E>>)>,
    fetcher: Option<QueryFetcher<T, E>>,
    metrics: QueryMetrics,
}

impl<T, E> Default for Entry<T, E> {
    fn default() -> Self {
        Self {
            value: None,
            stale: true,
            generation: 0,
            subscribers: 0,
            in_flight: None,
            fetcher: None,
            metrics: QueryMetrics::default(),
        }
    }
}

struct Shared<T, E> {
    entries: Mutex<BTreeMap<String, Entry<T, E>>>,
    next_flight_id: AtomicU64,
}

/// Cloneable handle to one process-wide cache instance.
pub struct QueryCache<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for QueryCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Default for QueryCache<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Display + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> QueryCache<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Display + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(BTreeMap::new()),
                next_flight_id: AtomicU64::new(1),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry<T, E>>> {
        self.shared.entries.lock().expect("query cache lock poisoned")
    }

    /// Reads the query, fetching when the entry is stale and `enabled`.
    ///
    /// Disabled queries hold their previous value without touching the
    /// network; `Ok(None)` means no result has ever been fetched.
    pub async fn run(
        &self,
        key: &str,
        fetcher: QueryFetcher<T, E>,
        enabled: bool,
    ) -> Result<Option<T>, E> {
        {
            let mut entries = self.entries();
            let entry = entries.entry(key.to_string()).or_default();
            entry.fetcher = Some(fetcher.clone());
            if !enabled {
                return Ok(entry.value.clone());
            }
            if !entry.stale {
                if let Some(value) = &entry.value {
                    return Ok(Some(value.clone()));
                }
            }
        }
        self.fetch_once(key, fetcher).await.map(Some)
    }

    /// Registers an observer for `key` and, when `enabled`, brings the
    /// entry up to date (a stale or never-fetched entry begins a fetch).
    pub async fn subscribe(
        &self,
        key: &str,
        fetcher: QueryFetcher<T, E>,
        enabled: bool,
    ) -> Result<Option<T>, E> {
        {
            let mut entries = self.entries();
            let entry = entries.entry(key.to_string()).or_default();
            entry.subscribers += 1;
            entry.fetcher = Some(fetcher.clone());
            info!(
                "event=cache_subscribe module=cache key={key} subscribers={}",
                entry.subscribers
            );
            if !(enabled && entry.stale) {
                return Ok(entry.value.clone());
            }
        }
        self.fetch_once(key, fetcher).await.map(Some)
    }

    /// Removes one observer. Cached data is retained for fast remounts;
    /// only the refetch obligation ends with the last observer.
    pub fn unsubscribe(&self, key: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            info!(
                "event=cache_unsubscribe module=cache key={key} subscribers={}",
                entry.subscribers
            );
        }
    }

    /// Marks `key` stale and, while it has at least one observer,
    /// refetches until the entry holds a post-invalidation snapshot.
    /// Without observers the entry refetches lazily on next use.
    ///
    /// The triggered refetch is awaited, never detached.
    pub async fn invalidate(&self, key: &str, cause: InvalidationCause) {
        let (should_refetch, fetcher) = {
            let mut entries = self.entries();
            let entry = entries.entry(key.to_string()).or_default();
            entry.generation += 1;
            entry.stale = true;
            entry.metrics.invalidations += 1;
            info!(
                "event=cache_invalidate module=cache key={key} cause={cause} subscribers={}",
                entry.subscribers
            );
            (entry.subscribers > 0, entry.fetcher.clone())
        };

        let Some(fetcher) = fetcher else { return };
        if !should_refetch {
            return;
        }

        // A fetch that was already in flight completes stale; keep going
        // until one that started after the invalidation lands.
        loop {
            match self.fetch_once(key, fetcher.clone()).await {
                Ok(_) => {
                    let entries = self.entries();
                    let done = entries.get(key).map_or(true, |entry| !entry.stale);
                    if done {
                        return;
                    }
                }
                Err(err) => {
                    warn!(
                        "event=cache_refetch module=cache status=error key={key} error={err}"
                    );
                    return;
                }
            }
        }
    }

    /// Last-known value without any fetching.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.entries().get(key).and_then(|entry| entry.value.clone())
    }

    pub fn metrics(&self, key: &str) -> QueryMetrics {
        self.entries()
            .get(key)
            .map(|entry| entry.metrics)
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.entries().get(key).map_or(0, |entry| entry.subscribers)
    }

    /// Joins the in-flight fetch for `key` or starts one.
    ///
    /// The actual fetch runs on a spawned task so it populates the cache
    /// even if every waiting caller is cancelled or unsubscribes.
    async fn fetch_once(&self, key: &str, fetcher: QueryFetcher<T, E>) -> Result<T, E> {
        loop {
            let (flight_id, mut receiver) = {
                let mut entries = self.entries();
                let entry = entries.entry(key.to_string()).or_default();

                if let Some((flight_id, sender)) = &entry.in_flight {
                    (*flight_id, sender.subscribe())
                } else {
                    let (sender, receiver) = broadcast::channel(1);
                    let flight_id = self.shared.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    entry.in_flight = Some((flight_id, sender.clone()));
                    entry.metrics.fetches_started += 1;
                    let generation = entry.generation;
                    drop(entries);

                    let shared = Arc::clone(&self.shared);
                    let key_owned = key.to_string();
                    let fetcher = fetcher.clone();
                    tokio::spawn(async move {
                        let outcome = fetcher().await;
                        {
                            let mut entries =
                                shared.entries.lock().expect("query cache lock poisoned");
                            if let Some(entry) = entries.get_mut(&key_owned) {
                                if entry.in_flight.as_ref().map(|(id, _)| *id)
                                    == Some(flight_id)
                                {
                                    entry.in_flight = None;
                                }
                                match &outcome {
                                    Ok(value) => {
                                        entry.value = Some(value.clone());
                                        entry.stale = entry.generation != generation;
                                    }
                                    Err(err) => {
                                        warn!(
                                            "event=cache_fetch module=cache status=error \
                                             key={key_owned} error={err}"
                                        );
                                    }
                                }
                            }
                        }
                        let _ = sender.send(outcome);
                    });
                    (flight_id, receiver)
                }
            };

            match receiver.recv().await {
                Ok(outcome) => return outcome,
                // Sender gone or overwritten without a deliverable value.
                // Re-inspect the entry and either serve the fresh result
                // or start over.
                Err(_) => {
                    let mut entries = self.entries();
                    if let Some(entry) = entries.get_mut(key) {
                        if entry.in_flight.as_ref().map(|(id, _)| *id) == Some(flight_id) {
                            entry.in_flight = None;
                        }
                        if !entry.stale {
                            if let Some(value) = &entry.value {
                                return Ok(value.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}
