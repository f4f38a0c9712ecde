//! DynamicConfig handles for live-updatable config.
//!
//! Backed by `ArcSwap`: readers take a whole snapshot without locking, so a reader never
//! sees half of an update.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Default> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Update via closure. Concurrent updates are not lost: `f` is re-run against the
    /// newer value if another writer got there first.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        self.inner.rcu(|cur| f(&**cur));
    }
}

#[cfg(test)]
mod tests {
    use super::DynamicConfig;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn get_set_update() {
        let a = DynamicConfig::new(1);
        assert_eq!(*a.get(), 1);
        a.set(2);
        assert_eq!(*a.get(), 2);
        a.update(|v| v + 3);
        assert_eq!(*a.get(), 5);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let cfg: DynamicConfig<HashMap<u32, u32>> = DynamicConfig::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cfg = cfg.clone();
                std::thread::spawn(move || {
                    cfg.update(|m| {
                        let mut next = m.clone();
                        next.insert(i, i);
                        next
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cfg.get().len(), 8);
    }

    #[test]
    fn snapshots_outlive_updates() {
        let cfg = DynamicConfig::new(String::from("old"));
        let snap: Arc<String> = cfg.get();
        cfg.set("new".into());
        assert_eq!(*snap, "old");
        assert_eq!(*cfg.get(), "new");
    }
}
