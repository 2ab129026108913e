//! Read-through cache for company lists.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::errors::ClientError;
use crate::model::CompanyList;

/// Time source for cache freshness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CachedList {
    companies: Arc<[String]>,
    fetched_at: Instant,
}

/// Time-boxed memo of company lists, shared by concurrent calls.
///
/// Individual reads and writes are serialized per key; concurrent refreshes
/// of the same key are last-writer-wins.
pub struct CompanyListCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<CompanyList, CachedList>,
}

impl CompanyListCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Returns the cached list if it is still fresh.
    pub fn get(&self, list: CompanyList) -> Option<Arc<[String]>> {
        let now = self.clock.now();
        let entry = self.entries.get(&list)?;
        if now.saturating_duration_since(entry.fetched_at) < self.ttl {
            Some(entry.companies.clone())
        } else {
            None
        }
    }

    /// Stores a freshly fetched list.
    pub fn insert(&self, list: CompanyList, companies: Vec<String>) -> Arc<[String]> {
        let companies: Arc<[String]> = companies.into();
        self.entries.insert(
            list,
            CachedList {
                companies: companies.clone(),
                fetched_at: self.clock.now(),
            },
        );
        companies
    }

    pub fn invalidate(&self, list: CompanyList) {
        self.entries.remove(&list);
    }

    /// Returns the fresh cached list or fetches and stores a new one.
    ///
    /// No lock is held while `fetch` runs.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        list: CompanyList,
        fetch: F,
    ) -> Result<Arc<[String]>, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>, ClientError>>,
    {
        if let Some(hit) = self.get(list) {
            debug!(%list, "company list cache hit");
            return Ok(hit);
        }
        debug!(%list, "company list cache miss");
        let companies = fetch().await?;
        Ok(self.insert(list, companies))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.offset.lock().expect("clock") += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().expect("clock")
        }
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = CompanyListCache::with_clock(Duration::from_secs(3600), clock.clone());
        let fetches = AtomicUsize::new(0);
        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["TCS".to_string(), "INFY".to_string()])
        };

        let first = cache.get_or_fetch(CompanyList::Nifty50, fetch).await.expect("fetch");
        assert_eq!(&*first, ["TCS".to_string(), "INFY".to_string()].as_slice());

        clock.advance(Duration::from_secs(3599));
        cache.get_or_fetch(CompanyList::Nifty50, fetch).await.expect("hit");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        cache.get_or_fetch(CompanyList::Nifty50, fetch).await.expect("refresh");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached_and_keys_are_independent() {
        let cache = CompanyListCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_fetch(CompanyList::Nifty100, || async {
                Err(ClientError::transport("down"))
            })
            .await
            .expect_err("fetch failed");
        assert!(matches!(err, ClientError::Transport { .. }));
        assert!(cache.get(CompanyList::Nifty100).is_none());

        cache.insert(CompanyList::Nifty200, vec!["HDFCBANK".into()]);
        assert!(cache.get(CompanyList::Nifty200).is_some());
        assert!(cache.get(CompanyList::Nifty50).is_none());

        cache.invalidate(CompanyList::Nifty200);
        assert!(cache.get(CompanyList::Nifty200).is_none());
    }

    #[test]
    fn last_writer_wins() {
        let cache = CompanyListCache::new(Duration::from_secs(60));
        cache.insert(CompanyList::Nifty50, vec!["A".into()]);
        cache.insert(CompanyList::Nifty50, vec!["B".into()]);
        assert_eq!(
            cache.get(CompanyList::Nifty50).as_deref(),
            Some(["B".to_string()].as_slice())
        );
    }
}
