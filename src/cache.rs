//! Time-bounded memoization of fetch results.

use crate::fetcher::FetchError;
use crate::record::Table;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: std::sync::Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    table: Arc<Table>,
    fetched_at: DateTime<Utc>,
}

/// Single-slot-per-key cache of fetched tables.
///
/// The entry map stays locked for the duration of a fetch, so concurrent
/// callers wait for the in-flight fetch and then read its result.
#[derive(Debug)]
pub struct ResultCache<C: Clock = SystemClock> {
    clock: C,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache<SystemClock> {
    pub fn new() -> Self {
        ResultCache::with_clock(SystemClock)
    }
}

impl Default for ResultCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ResultCache<C> {
    pub fn with_clock(clock: C) -> Self {
        ResultCache {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the memoized table for `key` if it is younger than `ttl`,
    /// otherwise runs `fetch` and stores its result.
    ///
    /// # Errors
    /// Propagates the fetch error unchanged. Failed fetches leave any
    /// previous entry in place.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Arc<Table>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Table, FetchError>>,
    {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        if let Some(entry) = entries.get(key) {
            let age = now.signed_duration_since(entry.fetched_at);
            if age >= chrono::Duration::zero() && age.to_std().map_or(false, |age| age < ttl) {
                log::debug!("Cache hit for {} (age {}s)", key, age.num_seconds());
                return Ok(Arc::clone(&entry.table));
            }
        }

        log::debug!("Cache miss for {}", key);
        let table = Arc::new(fetch().await?);
        entries.insert(
            key.to_string(),
            CacheEntry {
                table: Arc::clone(&table),
                fetched_at: self.clock.now(),
            },
        );
        Ok(table)
    }

    /// Forces the next `get_or_fetch` for `key` to fetch again.
    pub async fn invalidate(&self, key: &str) {
        if self.entries.lock().await.remove(key).is_some() {
            log::info!("Invalidated cache entry {}", key);
        }
    }

    pub async fn invalidate_all(&self) {
        self.entries.lock().await.clear();
    }

    /// When the entry for `key` was last fetched, if cached.
    pub async fn fetched_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(key).map(|entry| entry.fetched_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Value};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table_with(n: usize) -> Table {
        let mut record = Record::new();
        record.insert("n".to_string(), Value::Number(n as f64));
        Table::from_records(vec![record])
    }

    fn cache() -> (Arc<ManualClock>, ResultCache<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ));
        (Arc::clone(&clock), ResultCache::with_clock(clock))
    }

    #[tokio::test]
    async fn serves_memoized_table_within_ttl() {
        let (clock, cache) = cache();
        let calls = &AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        for _ in 0..3 {
            let table = cache
                .get_or_fetch("k", ttl, || async move {
                    Ok(table_with(calls.fetch_add(1, Ordering::SeqCst)))
                })
                .await
                .unwrap();
            assert_eq!(table.value(0, "n"), &Value::Number(0.0));
            clock.advance(Duration::from_secs(10));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_ttl_expires() {
        let (clock, cache) = cache();
        let calls = &AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);
        let fetch = || async move { Ok(table_with(calls.fetch_add(1, Ordering::SeqCst))) };

        cache.get_or_fetch("k", ttl, fetch).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let table = cache.get_or_fetch("k", ttl, fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(table.value(0, "n"), &Value::Number(1.0));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (_clock, cache) = cache();
        let calls = &AtomicUsize::new(0);
        let ttl = Duration::from_secs(600);
        let fetch = || async move { Ok(table_with(calls.fetch_add(1, Ordering::SeqCst))) };

        cache.get_or_fetch("k", ttl, fetch).await.unwrap();
        assert!(cache.fetched_at("k").await.is_some());
        cache.invalidate("k").await;
        assert!(cache.fetched_at("k").await.is_none());
        cache.get_or_fetch("k", ttl, fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_all_drops_every_key() {
        let (_clock, cache) = cache();
        let ttl = Duration::from_secs(600);

        cache.get_or_fetch("a", ttl, || async { Ok(table_with(1)) }).await.unwrap();
        cache.get_or_fetch("b", ttl, || async { Ok(table_with(2)) }).await.unwrap();
        cache.invalidate_all().await;

        assert!(cache.fetched_at("a").await.is_none());
        assert!(cache.fetched_at("b").await.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_is_not_stored() {
        let (_clock, cache) = cache();
        let ttl = Duration::from_secs(60);

        let result = cache
            .get_or_fetch("k", ttl, || async {
                Err(FetchError::Network("down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.fetched_at("k").await.is_none());

        let table = cache
            .get_or_fetch("k", ttl, || async { Ok(table_with(7)) })
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let (_clock, cache) = cache();
        let calls = &AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);
        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(table_with(1))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", ttl, fetch),
            cache.get_or_fetch("k", ttl, fetch)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
