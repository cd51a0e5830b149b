//! Caching layer for frequently accessed ledger data
//!
//! Provides LRU caching for:
//! - Decoded block chunks
//! - Recently read blockchain states
//! - Node roles per block height (with expiry)
use crate::blockchain::{Block, BlockNumber, BlockchainState, NodeRole};
use lru::LruCache;
use parking_lot::RwLock;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Generic, thread-safe LRU cache wrapper using RwLock.
///
/// Reads take the read lock and use `peek`, so lookups never contend with
/// each other; recency is only refreshed on insert.
pub struct ThreadSafeCache<K, V> {
    cache: Arc<RwLock<LruCache<K, V>>>,
}

impl<K, V> ThreadSafeCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with specified capacity. Zero is treated as one.
    pub fn new_lru(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity_nz))),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.read().peek(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.cache.write().put(key, value);
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.write().pop(key)
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.read().cap().get()
    }
}

impl<K, V> Clone for ThreadSafeCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

/// Decoded block chunks keyed by `(filename, last block)`.
pub type ChunkCache = ThreadSafeCache<(String, BlockNumber), Arc<Vec<Block>>>;

impl ChunkCache {
    pub const DEFAULT_CAPACITY: usize = 16;

    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }
}

/// Blockchain states keyed by last block number.
pub type StateCache = ThreadSafeCache<Option<BlockNumber>, Arc<BlockchainState>>;

impl StateCache {
    pub const DEFAULT_CAPACITY: usize = 4;

    pub fn new(capacity: usize) -> Self {
        Self::new_lru(capacity)
    }
}

/// Node role lookups keyed by `(identifier, block number)`.
///
/// Entries expire after `ttl` so a role computed for the next block is
/// recomputed once that block's schedule or declarations may have changed.
pub struct RoleCache {
    entries: ThreadSafeCache<(String, BlockNumber), (Option<NodeRole>, Instant)>,
    ttl: Duration,
}

impl RoleCache {
    pub const DEFAULT_CAPACITY: usize = 1024;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: ThreadSafeCache::new_lru(capacity),
            ttl,
        }
    }

    /// `Some(role)` on a fresh hit, where `role` itself may be `None`.
    pub fn get_role(&self, key: &(String, BlockNumber)) -> Option<Option<NodeRole>> {
        let (role, stored_at) = self.entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            self.entries.remove(key);
            return None;
        }
        Some(role)
    }

    pub fn put_role(&self, key: (String, BlockNumber), role: Option<NodeRole>) {
        self.entries.put(key, (role, Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
