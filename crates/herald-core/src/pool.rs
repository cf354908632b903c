//! Keyed object pool with self-reported hibernation.
//!
//! A [`Pool`] maps keys to live instances. Instances that become idle call
//! their [`Hibernate`] handle, which unregisters them and parks them on a
//! free list. The next key that misses the registry reactivates a parked
//! instance instead of allocating a new one, so a huge key space can be
//! served by roughly as many objects as there are busy keys.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

/// Lifecycle hooks for pooled objects.
pub trait Pooled: Send + Sync + Sized + 'static {
    /// Registry key.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Configuration shared by every instance of the pool.
    type Config: Send + Sync + 'static;

    /// Build a fresh instance bound to `key`.
    fn create(key: Self::Key, hibernate: Hibernate, config: &Self::Config) -> Self;

    /// Rebind a parked instance to `key`.
    ///
    /// Afterwards the instance must behave exactly like a freshly created one.
    fn reactivate(&self, key: Self::Key, hibernate: Hibernate);
}

/// One-shot handle an instance uses to return itself to its pool.
pub struct Hibernate(Box<dyn FnOnce() + Send>);

impl Hibernate {
    /// Wrap a release callback.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(release))
    }

    /// Unregister the instance and park it on the free list.
    pub fn hibernate(self) {
        (self.0)();
    }
}

impl fmt::Debug for Hibernate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hibernate")
    }
}

struct PoolInner<T: Pooled> {
    items: DashMap<T::Key, Arc<T>>,
    free: Mutex<Vec<Arc<T>>>,
    config: T::Config,
}

impl<T: Pooled> PoolInner<T> {
    fn free(&self) -> MutexGuard<'_, Vec<Arc<T>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &T::Key) {
        if let Some((_, instance)) = self.items.remove(key) {
            trace!(key = ?key, "Instance hibernated");
            self.free().push(instance);
        }
    }
}

/// A registry of live instances plus a free list of parked ones.
pub struct Pool<T: Pooled> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Pooled> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Pooled> Pool<T> {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: T::Config) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                items: DashMap::new(),
                free: Mutex::new(Vec::new()),
                config,
            }),
        }
    }

    /// Get the live instance for `key`, creating or reactivating one if needed.
    pub fn get(&self, key: &T::Key) -> Arc<T> {
        if let Some(entry) = self.inner.items.get(key) {
            return Arc::clone(entry.value());
        }

        // The entry guard holds the shard lock, so a racing caller for the
        // same key either sees our instance or waits for it.
        let entry = self
            .inner
            .items
            .entry(key.clone())
            .or_insert_with(|| self.acquire(key.clone()));
        Arc::clone(entry.value())
    }

    /// Number of instances registered under a key.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.inner.items.len()
    }

    /// Number of instances parked on the free list.
    #[must_use]
    pub fn dormant_len(&self) -> usize {
        self.inner.free().len()
    }

    /// Whether an instance is currently registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &T::Key) -> bool {
        self.inner.items.contains_key(key)
    }

    /// Shared instance configuration.
    #[must_use]
    pub fn config(&self) -> &T::Config {
        &self.inner.config
    }

    fn acquire(&self, key: T::Key) -> Arc<T> {
        let hibernate = self.hibernator(key.clone());
        let parked = self.inner.free().pop();
        match parked {
            Some(instance) => {
                trace!(key = ?key, "Reactivating parked instance");
                instance.reactivate(key, hibernate);
                instance
            }
            None => {
                trace!(key = ?key, "Creating instance");
                Arc::new(T::create(key, hibernate, &self.inner.config))
            }
        }
    }

    fn hibernator(&self, key: T::Key) -> Hibernate {
        let pool: Weak<PoolInner<T>> = Arc::downgrade(&self.inner);
        Hibernate::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.release(&key);
            }
        })
    }
}
