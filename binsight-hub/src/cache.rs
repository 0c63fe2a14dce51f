//! TTL cache for listing pages and statistics snapshots
//!
//! Aggregate queries are recomputed wholesale, so the cache runs broad:
//! any write to the classification store invalidates every cached entry
//! rather than tracking which windows a write touches. A stale read
//! racing a concurrent invalidation is tolerated.

use binsight_common::model::{ClassificationPage, StatisticsSnapshot};
use binsight_common::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache key for one listing page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub page: i64,
    pub page_size: i64,
    pub label: Option<String>,
}

/// Cache key for one statistics window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

struct CachedEntry<T> {
    value: T,
    inserted_at: Instant,
}

impl<T: Clone> CachedEntry<T> {
    fn fresh_value(&self, ttl: Duration) -> Option<T> {
        (self.inserted_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

pub struct AggregateCache {
    ttl: Duration,
    listings: RwLock<HashMap<ListingKey, CachedEntry<ClassificationPage>>>,
    stats: RwLock<HashMap<StatsKey, CachedEntry<StatisticsSnapshot>>>,
}

impl AggregateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            listings: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Serve a listing page from cache, computing and storing it on miss
    /// or expiry
    pub async fn listing_or_compute<F, Fut>(&self, key: ListingKey, compute: F) -> Result<ClassificationPage>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClassificationPage>>,
    {
        if let Some(hit) = self.listings.read().await.get(&key).and_then(|e| e.fresh_value(self.ttl)) {
            return Ok(hit);
        }

        let value = compute().await?;
        self.listings.write().await.insert(
            key,
            CachedEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );

        Ok(value)
    }

    /// Serve a statistics snapshot from cache, computing and storing it
    /// on miss or expiry
    pub async fn stats_or_compute<F, Fut>(&self, key: StatsKey, compute: F) -> Result<StatisticsSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StatisticsSnapshot>>,
    {
        if let Some(hit) = self.stats.read().await.get(&key).and_then(|e| e.fresh_value(self.ttl)) {
            return Ok(hit);
        }

        let value = compute().await?;
        self.stats.write().await.insert(
            key,
            CachedEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );

        Ok(value)
    }

    /// Drop every cached entry, listing pages and statistics alike
    pub async fn invalidate_all(&self) {
        self.listings.write().await.clear();
        self.stats.write().await.clear();
    }

    #[cfg(test)]
    async fn cached_entries(&self) -> (usize, usize) {
        (self.listings.read().await.len(), self.stats.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_page() -> ClassificationPage {
        ClassificationPage {
            items: Vec::new(),
            page: 1,
            page_size: 20,
            total_results: 0,
            total_pages: 0,
        }
    }

    fn key(page: i64) -> ListingKey {
        ListingKey {
            page,
            page_size: 20,
            label: None,
        }
    }

    #[tokio::test]
    async fn test_second_read_hits_cache() {
        let cache = AggregateCache::new(Duration::from_secs(300));
        let computes = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .listing_or_compute(key(1), || async {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(empty_page())
                })
                .await
                .unwrap();
        }

        assert_eq!(computes.load(Ordering::SeqCst), 1, "Only the first read should compute");
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_separately() {
        let cache = AggregateCache::new(Duration::from_secs(300));
        let computes = AtomicUsize::new(0);

        for page in [1, 2, 1] {
            cache
                .listing_or_compute(key(page), || async {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(empty_page())
                })
                .await
                .unwrap();
        }

        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = AggregateCache::new(Duration::from_millis(20));
        let computes = AtomicUsize::new(0);

        let compute = || async {
            computes.fetch_add(1, Ordering::SeqCst);
            Ok(empty_page())
        };

        cache.listing_or_compute(key(1), compute).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.listing_or_compute(key(1), compute).await.unwrap();

        assert_eq!(computes.load(Ordering::SeqCst), 2, "Expired entry should recompute");
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_both_maps() {
        let cache = AggregateCache::new(Duration::from_secs(300));

        cache
            .listing_or_compute(key(1), || async { Ok(empty_page()) })
            .await
            .unwrap();

        let stats_key = StatsKey { from: None, to: None };
        cache
            .stats_or_compute(stats_key.clone(), || async {
                Ok(StatisticsSnapshot {
                    total_classifications: 0,
                    today_count: 0,
                    week_count: 0,
                    month_count: 0,
                    average_confidence: 0.0,
                    average_processing_ms: 0.0,
                    override_rate_percent: 0.0,
                    label_breakdown: Vec::new(),
                    hourly_breakdown: Vec::new(),
                    window_start: None,
                    window_end: None,
                    computed_at: Utc::now(),
                })
            })
            .await
            .unwrap();

        assert_eq!(cache.cached_entries().await, (1, 1));
        cache.invalidate_all().await;
        assert_eq!(cache.cached_entries().await, (0, 0));

        let computes = AtomicUsize::new(0);
        cache
            .listing_or_compute(key(1), || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok(empty_page())
            })
            .await
            .unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 1, "Invalidation should force a recompute");
    }

    #[tokio::test]
    async fn test_compute_errors_are_not_cached() {
        let cache = AggregateCache::new(Duration::from_secs(300));
        let computes = AtomicUsize::new(0);

        let failed = cache
            .listing_or_compute(key(1), || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Err(binsight_common::Error::Internal("backend down".to_string()))
            })
            .await;
        assert!(failed.is_err());

        cache
            .listing_or_compute(key(1), || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok(empty_page())
            })
            .await
            .unwrap();

        assert_eq!(computes.load(Ordering::SeqCst), 2, "Error result must not be served from cache");
    }
}
