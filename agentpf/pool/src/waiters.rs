use ahash::RandomState;
use dashmap::{mapref::entry::Entry, DashMap};
use std::hash::Hash;
use tokio_util::sync::CancellationToken;

/// Single-use notifications keyed by an agent attribute (pod IP or workload).
///
/// Each key has at most one outstanding token. Every caller waiting on a key
/// shares that token and is released by the same `notify`.
#[derive(Debug)]
pub(crate) struct Waiters<K: Eq + Hash> {
    waiters: DashMap<K, CancellationToken, RandomState>,
}

// === impl Waiters ===

impl<K: Eq + Hash + Clone> Waiters<K> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Returns a token to wait on, or `None` if `satisfied` reports that
    /// there is nothing to wait for.
    ///
    /// `satisfied` runs while the key's slot is locked, so a concurrent
    /// `notify` can't slip in between the check and the registration.
    pub(crate) fn register(
        &self,
        key: K,
        satisfied: impl FnOnce() -> bool,
    ) -> Option<CancellationToken> {
        match self.waiters.entry(key) {
            Entry::Occupied(entry) => {
                if satisfied() {
                    entry.remove().cancel();
                    return None;
                }
                Some(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                if satisfied() {
                    return None;
                }
                let token = CancellationToken::new();
                entry.insert(token.clone());
                Some(token)
            }
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.waiters.contains_key(key)
    }

    /// Releases and forgets every waiter whose key is now satisfied.
    pub(crate) fn notify(&self, satisfied: impl Fn(&K) -> bool) {
        self.waiters.retain(|key, token| {
            if satisfied(key) {
                token.cancel();
                return false;
            }
            true
        });
    }

    pub(crate) fn release_all(&self) {
        self.notify(|_| true);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}
