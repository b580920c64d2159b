use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use reaper_common::helpers::subnet::normalize_key;

#[derive(Default)]
struct IpBucket {
    timestamps: VecDeque<DateTime<Utc>>,
}

#[derive(Default)]
struct SubnetBucket {
    entries: VecDeque<(DateTime<Utc>, String)>,
}

/// Sliding-window failure counters, keyed independently per IP and per
/// subnet. Each key owns its own lock; unrelated keys never contend.
///
/// Callers must supply non-decreasing timestamps per key (ingestion stamps
/// processing time, which satisfies this) - eviction peeks at the queue
/// front only.
pub struct CounterStore {
    ip_buckets: RwLock<HashMap<String, Arc<Mutex<IpBucket>>>>,
    subnet_buckets: RwLock<HashMap<String, Arc<Mutex<SubnetBucket>>>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self {
            ip_buckets: RwLock::new(HashMap::new()),
            subnet_buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Records a failure for `key` and returns the number of failures
    /// within the trailing `window` ending at `time`.
    pub async fn add_failure(&self, key: &str, time: DateTime<Utc>, window: Duration) -> usize {
        let bucket = self.ip_bucket(key).await;
        let mut bucket = bucket.lock().await;
        let cutoff = time - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());

        bucket.timestamps.push_back(time);
        while bucket
            .timestamps
            .front()
            .is_some_and(|front| *front < cutoff)
        {
            bucket.timestamps.pop_front();
        }

        bucket.timestamps.len()
    }

    /// Records a failure from `ip` against `subnet` and returns the total
    /// failure count and the number of distinct contributing IPs within the
    /// window. Uniqueness is recomputed over the retained entries each call.
    pub async fn add_subnet_failure(
        &self,
        subnet: &str,
        ip: &str,
        time: DateTime<Utc>,
        window: Duration,
    ) -> (usize, usize) {
        let bucket = self.subnet_bucket(subnet).await;
        let mut bucket = bucket.lock().await;
        let cutoff = time - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());

        bucket.entries.push_back((time, normalize_key(ip)));
        while bucket.entries.front().is_some_and(|(t, _)| *t < cutoff) {
            bucket.entries.pop_front();
        }

        let total = bucket.entries.len();
        let unique = bucket
            .entries
            .iter()
            .map(|(_, ip)| ip.as_str())
            .collect::<HashSet<_>>()
            .len();
        (total, unique)
    }

    async fn ip_bucket(&self, key: &str) -> Arc<Mutex<IpBucket>> {
        let key = normalize_key(key);
        {
            let buckets = self.ip_buckets.read().await;
            if let Some(bucket) = buckets.get(&key) {
                return bucket.clone();
            }
        }
        let mut buckets = self.ip_buckets.write().await;
        buckets.entry(key).or_default().clone()
    }

    async fn subnet_bucket(&self, key: &str) -> Arc<Mutex<SubnetBucket>> {
        let key = normalize_key(key);
        {
            let buckets = self.subnet_buckets.read().await;
            if let Some(bucket) = buckets.get(&key) {
                return bucket.clone();
            }
        }
        let mut buckets = self.subnet_buckets.write().await;
        buckets.entry(key).or_default().clone()
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_counts_within_window() {
        let store = CounterStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.add_failure("10.0.0.1", at(0), window).await, 1);
        assert_eq!(store.add_failure("10.0.0.1", at(10), window).await, 2);
        assert_eq!(store.add_failure("10.0.0.1", at(20), window).await, 3);
    }

    #[tokio::test]
    async fn test_evicts_outside_window() {
        let store = CounterStore::new();
        let window = Duration::from_secs(60);

        store.add_failure("10.0.0.1", at(0), window).await;
        store.add_failure("10.0.0.1", at(10), window).await;
        store.add_failure("10.0.0.1", at(20), window).await;

        // t=0 falls outside the trailing window ending at t=90
        assert_eq!(store.add_failure("10.0.0.1", at(90), window).await, 3);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = CounterStore::new();
        let window = Duration::from_secs(60);

        store.add_failure("10.0.0.1", at(0), window).await;
        assert_eq!(store.add_failure("10.0.0.2", at(1), window).await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_case_insensitive() {
        let store = CounterStore::new();
        let window = Duration::from_secs(60);

        store.add_failure("2001:DB8::1", at(0), window).await;
        assert_eq!(store.add_failure("2001:db8::1", at(1), window).await, 2);
    }

    #[tokio::test]
    async fn test_subnet_unique_count() {
        let store = CounterStore::new();
        let window = Duration::from_secs(300);
        let subnet = "203.0.113.0/24";

        let mut last = (0, 0);
        for i in 0..25 {
            let ip = format!("203.0.113.{}", i % 2 + 1);
            last = store
                .add_subnet_failure(subnet, &ip, at(i as i64), window)
                .await;
        }
        assert_eq!(last, (25, 2));

        let (total, unique) = store
            .add_subnet_failure(subnet, "203.0.113.77", at(30), window)
            .await;
        assert_eq!(total, 26);
        assert_eq!(unique, 3);
    }

    #[tokio::test]
    async fn test_subnet_unique_count_shrinks_with_eviction() {
        let store = CounterStore::new();
        let window = Duration::from_secs(60);
        let subnet = "203.0.113.0/24";

        store
            .add_subnet_failure(subnet, "203.0.113.1", at(0), window)
            .await;
        store
            .add_subnet_failure(subnet, "203.0.113.2", at(10), window)
            .await;

        // by t=90 only the t=10 entry and the new one remain
        let (total, unique) = store
            .add_subnet_failure(subnet, "203.0.113.2", at(90), window)
            .await;
        assert_eq!(total, 2);
        assert_eq!(unique, 1);
    }
}
