//! IP address to AS number resolution
//!
//! The lookup service is a black box; the monitor only needs `ip -> AS`.
//! Answers are stable for the lifetime of a detection window, so lookups are
//! cached, negative answers included.

mod ripestat;

pub use ripestat::{RipeStatResolver, DEFAULT_RIPESTAT_URL};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TransportError;
use crate::models::AsNumber;

/// Default number of cached addresses before the cache is flushed
const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Resolves an IP address to the AS that originates it
#[async_trait]
pub trait AsResolver: Send + Sync {
    /// Look up the AS for `ip`
    ///
    /// `Ok(None)` is a definite "no AS" answer; `Err` means the lookup itself failed.
    async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, TransportError>;

    /// Best-effort resolution; lookup failures resolve to `None`
    async fn resolve(&self, ip: &str) -> Option<AsNumber> {
        match self.lookup(ip).await {
            Ok(asn) => asn,
            Err(e) => {
                tracing::debug!(ip = %ip, error = %e, "AS lookup failed");
                None
            }
        }
    }
}

/// Caching wrapper around another resolver
///
/// Only definite answers are cached; failed lookups are retried on next use.
pub struct CachedResolver {
    inner: Arc<dyn AsResolver>,
    cache: DashMap<String, Option<AsNumber>>,
    capacity: usize,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn AsResolver>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl AsResolver for CachedResolver {
    async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, TransportError> {
        if let Some(hit) = self.cache.get(ip) {
            return Ok(*hit);
        }

        let answer = self.inner.lookup(ip).await?;
        if self.cache.len() >= self.capacity {
            self.cache.clear();
        }
        self.cache.insert(ip.to_string(), answer);
        Ok(answer)
    }
}

/// Fixed IP -> AS table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, AsNumber>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: impl Into<String>, asn: AsNumber) -> Self {
        self.table.insert(ip.into(), asn);
        self
    }

    pub fn insert(&mut self, ip: impl Into<String>, asn: AsNumber) {
        self.table.insert(ip.into(), asn);
    }
}

impl FromIterator<(String, AsNumber)> for StaticResolver {
    fn from_iter<T: IntoIterator<Item = (String, AsNumber)>>(iter: T) -> Self {
        Self {
            table: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AsResolver for StaticResolver {
    async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, TransportError> {
        Ok(self.table.get(ip).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AsResolver for CountingResolver {
        async fn lookup(&self, ip: &str) -> Result<Option<AsNumber>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Http("503".into()));
            }
            Ok(if ip.starts_with("10.") { None } else { Some(3333) })
        }
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_lookups() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedResolver::new(inner.clone());

        assert_eq!(cached.resolve("193.0.14.129").await, Some(3333));
        assert_eq!(cached.resolve("193.0.14.129").await, Some(3333));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_keeps_negative_answers() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedResolver::new(inner.clone());

        assert_eq!(cached.resolve("10.0.0.1").await, None);
        assert_eq!(cached.resolve("10.0.0.1").await, None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_lookups_not_cached() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cached = CachedResolver::new(inner.clone());

        assert_eq!(cached.resolve("193.0.14.129").await, None);
        assert_eq!(cached.resolve("193.0.14.129").await, None);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_cache_flushes_at_capacity() {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedResolver::new(inner).with_capacity(2);

        cached.resolve("1.1.1.1").await;
        cached.resolve("8.8.8.8").await;
        cached.resolve("9.9.9.9").await;
        assert_eq!(cached.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with_entry("193.0.14.129", 25152);
        assert_eq!(resolver.resolve("193.0.14.129").await, Some(25152));
        assert_eq!(resolver.resolve("192.0.2.1").await, None);
    }
}
