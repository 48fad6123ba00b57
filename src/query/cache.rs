//! Concurrent shape-keyed plan cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::CacheOptions;
use crate::query::plan::CompiledPlanEntry;
use crate::query::shape::QueryShape;

type Shard<P> = Mutex<LruCache<QueryShape, Arc<CompiledPlanEntry<P>>>>;

/// Counters describing cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries stored.
    pub inserts: u64,
    /// Inserts that found an entry published by a concurrent compile.
    pub races_lost: u64,
    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
}

/// Sharded map from [`QueryShape`] to compiled plan entries.
///
/// Lookups and inserts lock one shard chosen by the structural hash. No lock
/// is held while a plan compiles; when two threads compile the same shape the
/// first insert wins and the loser adopts the published entry.
pub struct ShapeCache<P> {
    shards: Vec<Shard<P>>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    races_lost: AtomicU64,
    evictions: AtomicU64,
}

impl<P> ShapeCache<P> {
    /// Creates a cache from `options`.
    pub fn new(options: &CacheOptions) -> Self {
        let shard_count = options.shards.max(1);
        let per_shard = options
            .capacity
            .map(|capacity| (capacity / shard_count).max(1))
            .and_then(NonZeroUsize::new);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(per_shard.map_or_else(LruCache::unbounded, LruCache::new)))
            .collect();
        Self {
            shards,
            enabled: options.enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            races_lost: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Whether lookups and inserts are served at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the entry cached for `shape`.
    ///
    /// Uncacheable shapes always miss without touching a shard.
    pub fn get(&self, shape: &QueryShape) -> Option<Arc<CompiledPlanEntry<P>>> {
        if !self.enabled || !shape.is_cacheable() {
            return None;
        }
        let found = self.shard_for(shape).lock().get(shape).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Publishes `entry` for `shape` unless an entry is already present.
    ///
    /// Returns the entry every caller should use: the already-present one
    /// when a concurrent insert won, otherwise `entry` itself.
    pub fn insert(
        &self,
        shape: QueryShape,
        entry: Arc<CompiledPlanEntry<P>>,
    ) -> Arc<CompiledPlanEntry<P>> {
        if !self.enabled || !shape.is_cacheable() {
            return entry;
        }
        let hash = shape.hash();
        let mut shard = self.shard_for(&shape).lock();
        if let Some(existing) = shard.get(&shape) {
            self.races_lost.fetch_add(1, Ordering::Relaxed);
            trace!(hash, "shape.cache.race_lost");
            return Arc::clone(existing);
        }
        if shard.push(shape, Arc::clone(&entry)).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(hash, "shape.cache.evict");
        }
        self.inserts.fetch_add(1, Ordering::Relaxed);
        entry
    }

    /// Number of cached entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns `true` when no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Entries already handed out stay valid.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn shard_for(&self, shape: &QueryShape) -> &Shard<P> {
        let idx = (shape.hash() as usize) % self.shards.len();
        &self.shards[idx]
    }
}
