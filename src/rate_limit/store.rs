use crate::rate_limit::quota::QuotaWindow;
use crate::rate_limit::window::RateWindow;
use crate::tier::{ScopeLimits, Tier};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Everything tracked for one scope. Guarded by its own mutex.
#[derive(Debug, Default)]
pub(crate) struct ScopeState {
    pub(crate) rate: RateWindow,
    pub(crate) quota: QuotaWindow,
    /// Limits applied by the most recent check; used when sweeping.
    pub(crate) limits: ScopeLimits,
    /// Class template and tier of the most recent check, so snapshots resolve the
    /// same limits the check did.
    pub(crate) class: Option<String>,
    pub(crate) tier: Option<Tier>,
}

/// In-memory per-scope state.
///
/// The map lock is only held to find or insert a scope's entry. All reads and writes of
/// a scope's windows happen under that scope's own mutex, so unrelated scopes never
/// contend beyond the brief map lookup.
#[derive(Default, Clone, Debug)]
pub(crate) struct ScopeStore {
    data: Arc<RwLock<HashMap<String, Arc<Mutex<ScopeState>>>>>,
}

fn lock(entry: &Mutex<ScopeState>) -> MutexGuard<'_, ScopeState> {
    // Windows stay structurally valid even if a holder panicked mid-update.
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScopeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry(&self, scope: &str) -> Arc<Mutex<ScopeState>> {
        {
            let map = self.data.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = map.get(scope) {
                return entry.clone();
            }
        }
        let mut map = self.data.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(scope.to_string()).or_default().clone()
    }

    /// Run `f` with exclusive access to `scope`'s state, creating it on first use.
    pub(crate) fn with_scope<R>(&self, scope: &str, f: impl FnOnce(&mut ScopeState) -> R) -> R {
        let entry = self.entry(scope);
        let mut state = lock(&entry);
        f(&mut state)
    }

    /// Run `f` against `scope`'s state if it exists. Never creates state.
    pub(crate) fn peek<R>(&self, scope: &str, f: impl FnOnce(Option<&ScopeState>) -> R) -> R {
        let entry = {
            let map = self.data.read().unwrap_or_else(PoisonError::into_inner);
            map.get(scope).cloned()
        };
        match entry {
            Some(entry) => {
                let state = lock(&entry);
                f(Some(&*state))
            }
            None => f(None),
        }
    }

    /// Drop every scope's state.
    pub(crate) fn clear(&self) {
        let mut map = self.data.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
    }

    /// Remove scopes for which `evict` returns true. Entries another caller is holding
    /// right now are kept; they are looked at again on the next pass.
    pub(crate) fn evict_where(&self, mut evict: impl FnMut(&ScopeState) -> bool) -> usize {
        let mut map = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, entry| Arc::strong_count(entry) > 1 || !evict(&*lock(&**entry)));
        before - map.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_never_creates_state() {
        let store = ScopeStore::new();
        assert!(store.peek("user:1", |s| s.is_none()));
        assert_eq!(store.len(), 0);
        store.with_scope("user:1", |_| ());
        assert!(store.peek("user:1", |s| s.is_some()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_skips_held_entries() {
        let store = ScopeStore::new();
        store.with_scope("a", |_| ());
        store.with_scope("b", |_| ());
        let held = store.entry("a");
        assert_eq!(store.evict_where(|_| true), 1);
        assert_eq!(store.len(), 1);
        drop(held);
        assert_eq!(store.evict_where(|_| true), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn poisoned_scope_is_recovered() {
        let store = ScopeStore::new();
        let cloned = store.clone();
        let _ = std::thread::spawn(move || {
            cloned.with_scope("p", |_| panic!("boom"));
        })
        .join();
        assert_eq!(store.with_scope("p", |s| s.rate.len()), 0);
    }
}
