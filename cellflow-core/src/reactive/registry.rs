//! Subscription registry.
//!
//! Every cell owns exactly one registry: an insertion-ordered map from
//! [`SubscriptionKey`] to observer callback. Keys are built from the owning
//! cell's [`CellId`] plus a per-cell sequence number, so a key handed out by
//! one cell can never remove an observer from another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

/// Unique identifier for a cell.
///
/// Allocated from a process-wide atomic counter when the cell is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque token identifying one `subscribe` call.
///
/// Never reused while the owning cell exists, even across `unsubscribe_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    cell: CellId,
    seq: u64,
}

impl SubscriptionKey {
    /// The cell that issued this key.
    pub fn cell(&self) -> CellId {
        self.cell
    }
}

/// A callback invoked with the new value on every write.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Insertion-ordered observer storage for a single cell.
pub(crate) struct SubscriptionRegistry<T> {
    owner: CellId,
    next_seq: u64,
    observers: IndexMap<SubscriptionKey, Observer<T>>,
}

impl<T> SubscriptionRegistry<T> {
    /// Create an empty registry owned by `owner`.
    pub fn new(owner: CellId) -> Self {
        Self {
            owner,
            next_seq: 0,
            observers: IndexMap::new(),
        }
    }

    /// Register an observer and return its fresh key.
    pub fn insert(&mut self, observer: Observer<T>) -> SubscriptionKey {
        let key = SubscriptionKey {
            cell: self.owner,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.observers.insert(key, observer);
        key
    }

    /// Remove the observer registered under `key`.
    ///
    /// Returns `false` (and does nothing) for unknown or foreign keys.
    pub fn remove(&mut self, key: SubscriptionKey) -> bool {
        // shift_remove keeps the remaining observers in registration order.
        self.observers.shift_remove(&key).is_some()
    }

    /// Drop every observer. The registry stays usable.
    pub fn clear(&mut self) -> usize {
        let removed = self.observers.len();
        self.observers.clear();
        removed
    }

    /// Check whether `key` still names a live observer.
    pub fn contains(&self, key: SubscriptionKey) -> bool {
        self.observers.contains_key(&key)
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is registered.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Copy out the current observers in registration order.
    ///
    /// A notification pass iterates over this snapshot so no lock is held
    /// while callbacks run.
    pub fn snapshot(&self) -> Vec<(SubscriptionKey, Observer<T>)> {
        self.observers
            .iter()
            .map(|(key, observer)| (*key, Arc::clone(observer)))
            .collect()
    }
}

impl<T> fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("owner", &self.owner)
            .field("next_seq", &self.next_seq)
            .field("len", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn noop() -> Observer<i32> {
        Arc::new(|_| {})
    }

    #[test]
    fn cell_ids_are_unique() {
        let id1 = CellId::next();
        let id2 = CellId::next();
        let id3 = CellId::next();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn keys_are_never_reused() {
        let mut registry = SubscriptionRegistry::new(CellId::next());

        let k1 = registry.insert(noop());
        assert!(registry.remove(k1));
        let k2 = registry.insert(noop());
        registry.clear();
        let k3 = registry.insert(noop());

        assert_ne!(k1, k2);
        assert_ne!(k2, k3);
        assert_ne!(k1, k3);
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let mut registry = SubscriptionRegistry::new(CellId::next());
        let key = registry.insert(noop());

        assert!(registry.remove(key));
        assert!(!registry.remove(key));
        assert!(registry.is_empty());
    }

    #[test]
    fn foreign_keys_do_not_match() {
        let mut a = SubscriptionRegistry::new(CellId::next());
        let mut b = SubscriptionRegistry::new(CellId::next());

        let key_a = a.insert(noop());
        let _key_b = b.insert(noop());

        // Same sequence number, different owner.
        assert!(!b.remove(key_a));
        assert_eq!(b.len(), 1);
        assert!(a.contains(key_a));
    }

    #[test]
    fn clear_leaves_registry_reusable() {
        let mut registry = SubscriptionRegistry::new(CellId::next());
        registry.insert(noop());
        registry.insert(noop());

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());

        let key = registry.insert(noop());
        assert!(registry.contains(key));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let mut registry = SubscriptionRegistry::new(CellId::next());
        let trace = Arc::new(AtomicI32::new(0));

        let mut keys = Vec::new();
        for digit in 1..=3 {
            let trace = trace.clone();
            keys.push(registry.insert(Arc::new(move |_: &i32| {
                let current = trace.load(Ordering::SeqCst);
                trace.store(current * 10 + digit, Ordering::SeqCst);
            })));
        }

        // Removing from the middle must not reorder the rest.
        registry.remove(keys[1]);

        for (_, observer) in registry.snapshot() {
            observer(&0);
        }
        assert_eq!(trace.load(Ordering::SeqCst), 13);
    }
}
