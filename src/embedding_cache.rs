//! Bounded in-process memo of text→vector lookups.

use std::num::NonZeroUsize;

use clap::ValueEnum;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use crate::embeddings::EmbeddingVector;

/// How the embedding cache picks a victim once it is full.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum EvictionPolicy {
    /// Evict the oldest inserted entry; reads never reorder.
    #[default]
    Fifo,
    /// Evict the least recently read or written entry.
    Lru,
}

/// Shared embedding cache keyed by the composed normalized text.
pub struct EmbeddingCache {
    entries: Option<RwLock<LruCache<String, EmbeddingVector>>>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl EmbeddingCache {
    /// Creates a cache bounded at `capacity` entries (0 disables caching).
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| RwLock::new(LruCache::new(cap))),
            capacity,
            policy,
        }
    }

    /// Cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(0, EvictionPolicy::Fifo)
    }

    /// Eviction policy in effect.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Maximum number of entries held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently cached.
    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(lock) => lock.read().await.len(),
            None => 0,
        }
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Looks up a cached vector.
    pub async fn get(&self, key: &str) -> Option<EmbeddingVector> {
        let lock = self.entries.as_ref()?;
        match self.policy {
            EvictionPolicy::Fifo => lock.read().await.peek(key).cloned(),
            EvictionPolicy::Lru => lock.write().await.get(key).cloned(),
        }
    }

    /// Looks up many keys under a single lock acquisition.
    ///
    /// Returns one slot per key, in key order.
    pub async fn get_many(&self, keys: &[&str]) -> Vec<Option<EmbeddingVector>> {
        let Some(lock) = &self.entries else {
            return vec![None; keys.len()];
        };
        match self.policy {
            EvictionPolicy::Fifo => {
                let guard = lock.read().await;
                keys.iter().map(|key| guard.peek(*key).cloned()).collect()
            }
            EvictionPolicy::Lru => {
                let mut guard = lock.write().await;
                keys.iter().map(|key| guard.get(*key).cloned()).collect()
            }
        }
    }

    /// Stores a vector, evicting one entry when the cache is full.
    pub async fn put(&self, key: String, vector: EmbeddingVector) {
        let Some(lock) = &self.entries else {
            return;
        };
        let mut guard = lock.write().await;
        Self::insert(&mut guard, self.policy, key, vector);
    }

    /// Stores many vectors under a single lock acquisition.
    pub async fn put_many(&self, entries: Vec<(String, EmbeddingVector)>) {
        let Some(lock) = &self.entries else {
            return;
        };
        let mut guard = lock.write().await;
        for (key, vector) in entries {
            Self::insert(&mut guard, self.policy, key, vector);
        }
    }

    fn insert(
        cache: &mut LruCache<String, EmbeddingVector>,
        policy: EvictionPolicy,
        key: String,
        vector: EmbeddingVector,
    ) {
        // FIFO keeps the original insertion slot when a key is rewritten.
        if policy == EvictionPolicy::Fifo {
            if let Some(slot) = cache.peek_mut(&key) {
                *slot = vector;
                return;
            }
        }
        if let Some((evicted, _)) = cache.push(key.clone(), vector) {
            if evicted != key {
                debug!(evicted = %evicted, "embedding cache full, evicted entry");
            }
        }
    }
}
