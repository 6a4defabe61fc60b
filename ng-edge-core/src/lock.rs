use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};
use tokio::sync::{Mutex, MutexGuard};

/// Fixed-size array of async mutexes indexed by key hash.
///
/// Serializes mutations per identity key without a global lock. Two
/// different keys may contend when they hash to the same shard; that is
/// acceptable and bounded by the shard count.
pub struct ShardedLockProvider {
    shards: Vec<Mutex<()>>,
}

impl ShardedLockProvider {
    /// Create a provider with `shards` mutexes. A zero count is promoted
    /// to one.
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Acquire the shard lock covering `key`.
    ///
    /// The guard must not be held across source or store I/O; it protects
    /// in-memory structure mutation only.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_for(key)].lock().await
    }
}
