use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use crate::core::error::Result;
use crate::query::ast::Filter;

/// Client-side cache of encoded filters, keyed by filter identity
pub struct ExpressionCache {
    entries: Mutex<LruCache<Filter, Arc<Vec<u8>>>>,
    capacity: usize,
    stats: FilterCacheStats,
}

impl ExpressionCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ExpressionCache {
            entries: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            stats: FilterCacheStats::default(),
        }
    }

    /// Encoded bytes for `filter`, serializing on a miss
    pub fn encode(&self, filter: &Filter) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.entries.lock().get(filter) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes.clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let bytes = Arc::new(bincode::serialize(filter)?);
        self.entries.lock().put(filter.clone(), bytes.clone());
        Ok(bytes)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> FilterCacheSnapshot {
        FilterCacheSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Default)]
struct FilterCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}
