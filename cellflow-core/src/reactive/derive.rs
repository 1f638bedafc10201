//! Derivation Engine
//!
//! Derived cells are ordinary cells fed by observers on their sources. Every
//! derivation records, on the derived cell, how to remove the subscriptions it
//! created, so `detach` can sever the cell later.
//!
//! # Operators
//!
//! - `map`: one source, `derived = f(source)`.
//! - `combine`: two sources, `derived = f(left, right)`, recomputed from both
//!   current values whenever either fires.
//! - `apply`: `combine` for a cell holding a [`Func`].
//! - `flat_map`: the source selects an inner cell; the derived cell mirrors
//!   whichever inner cell is currently selected.
//!
//! # Ownership
//!
//! An observer holds its target derived cell strongly, while teardown actions
//! and the `combine` handler reach sources through weak handles. A source thus
//! keeps its derived cells alive, never the other way around, and dropping
//! every handle to a source releases its whole subscription list.
//!
//! # Propagation
//!
//! Updates are pushed depth-first in subscription order, one write at a time.
//! There is no glitch protection: in a diamond-shaped graph a `combine` cell
//! may briefly observe one updated source and one stale source.

use std::sync::Arc;

use super::cell::Cell;
use super::lifecycle::TeardownRole;

/// A function value that can be stored in a cell and used with `apply`.
pub type Func<A, B> = Arc<dyn Fn(&A) -> B + Send + Sync>;

/// Wrap a closure as a [`Func`].
pub fn func<A, B, F>(f: F) -> Func<A, B>
where
    F: Fn(&A) -> B + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Derive a cell holding `f(value)` that follows every write to `self`.
    pub fn map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Cell::derived(f(&self.get()));

        let target = derived.clone();
        let key = self.subscribe(move |value| target.set(f(value)));
        derived.push_teardown(TeardownRole::Upstream, self.unsubscriber(key));

        tracing::trace!(source = %self.id(), derived = %derived.id(), "map wired");
        derived
    }

    /// Derive a cell holding `f(self, other)`.
    ///
    /// A write to either source re-reads both current values. If one of the
    /// sources has been dropped the recomputation is skipped.
    pub fn combine<A, B, F>(&self, other: &Cell<A>, f: F) -> Cell<B>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        F: Fn(&T, &A) -> B + Send + Sync + 'static,
    {
        let derived = Cell::derived(f(&self.get(), &other.get()));

        let left = self.downgrade();
        let right = other.downgrade();
        let target = derived.clone();
        let recompute: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let (Some(left), Some(right)) = (left.upgrade(), right.upgrade()) else {
                tracing::trace!(derived = %target.id(), "source dropped; recompute skipped");
                return;
            };
            target.set(f(&left.get(), &right.get()));
        });

        let on_left = Arc::clone(&recompute);
        let left_key = self.subscribe(move |_| on_left());
        let right_key = other.subscribe(move |_| recompute());

        derived.push_teardown(TeardownRole::Upstream, self.unsubscriber(left_key));
        derived.push_teardown(TeardownRole::Upstream, other.unsubscriber(right_key));

        tracing::trace!(
            left = %self.id(),
            right = %other.id(),
            derived = %derived.id(),
            "combine wired"
        );
        derived
    }

    /// Derive a cell mirroring the inner cell selected by `f`.
    ///
    /// Whenever `self` changes, the previously selected inner cell is let go
    /// (its forwarding subscription removed and the cell itself detached),
    /// `f` selects a new inner cell, the derived cell takes its current value,
    /// and later writes to the new inner cell are forwarded.
    ///
    /// Inner cells are owned by the derived cell: return fresh cells from `f`
    /// rather than shared derived cells, since a replaced inner cell is
    /// detached.
    pub fn flat_map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Cell<U> + Send + Sync + 'static,
    {
        let first = f(&self.get());
        let derived = Cell::derived(first.get());
        derived.follow(&first);

        let target = derived.clone();
        let key = self.subscribe(move |value| {
            if let Some(release) = target.take_inner_teardown() {
                release();
            }

            let next = f(value);
            tracing::debug!(derived = %target.id(), inner = %next.id(), "flat_map switched inner cell");

            target.set(next.get());
            target.follow(&next);
        });
        derived.push_teardown(TeardownRole::Upstream, self.unsubscriber(key));

        tracing::trace!(source = %self.id(), derived = %derived.id(), "flat_map wired");
        derived
    }

    /// Forward writes on `inner` into `self`, replacing nothing.
    ///
    /// Records the forwarding subscription as this cell's inner teardown.
    fn follow(&self, inner: &Cell<T>) {
        let target = self.clone();
        let key = inner.subscribe(move |value| target.set(value.clone()));

        let source = inner.downgrade();
        self.push_teardown(
            TeardownRole::Inner,
            Box::new(move || {
                if let Some(inner) = source.upgrade() {
                    inner.unsubscribe(key);
                    inner.detach();
                }
            }),
        );
    }
}

impl<A, B> Cell<Func<A, B>>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    /// Derive a cell holding `self(other)`.
    ///
    /// Recomputed when either the function or the argument changes.
    pub fn apply(&self, other: &Cell<A>) -> Cell<B> {
        self.combine(other, |f, a| f(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{pack, Lifecycle};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn map_tracks_source() {
        let source = pack(2);
        let tripled = source.map(|v| v * 3);
        assert_eq!(tripled.get(), 6);

        for value in [4, -1, 0, 17] {
            source.set(value);
            assert_eq!(tripled.get(), value * 3);
        }
        assert_eq!(tripled.lifecycle(), Lifecycle::Active);
    }

    #[test]
    fn map_changes_type() {
        let count = pack(3);
        let label = count.map(|n| format!("{n} items"));
        assert_eq!(label.get(), "3 items");

        count.set(1);
        assert_eq!(label.get(), "1 items");
    }

    #[test]
    fn map_chain_cascades_in_one_write() {
        let source = pack(1);
        let plus_one = source.map(|v| v + 1);
        let doubled = plus_one.map(|v| v * 2);

        source.set(10);
        assert_eq!(plus_one.get(), 11);
        assert_eq!(doubled.get(), 22);
    }

    #[test]
    fn map_notifies_its_own_observers() {
        let source = pack(0);
        let doubled = source.map(|v| v * 2);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();
        doubled.subscribe(move |_| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(1);
        source.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_detach_freezes_and_unsubscribes() {
        let source = pack(1);
        let doubled = source.map(|v| v * 2);
        assert_eq!(source.subscriber_count(), 1);

        doubled.detach();
        assert_eq!(source.subscriber_count(), 0);
        assert!(doubled.is_detached());

        source.set(50);
        assert_eq!(doubled.get(), 2);

        // Idempotent.
        doubled.detach();
        assert!(doubled.is_detached());
    }

    #[test]
    fn detach_keeps_own_observers() {
        let source = pack(1);
        let doubled = source.map(|v| v * 2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        doubled.subscribe(move |v| seen_clone.lock().push(*v));

        doubled.detach();
        source.set(5);
        assert!(seen.lock().is_empty());

        // Direct writes still reach the detached cell's observers.
        doubled.set(100);
        assert_eq!(*seen.lock(), vec![100]);
    }

    #[test]
    fn combine_recomputes_on_either_source() {
        let width = pack(2);
        let height = pack(3);
        let area = width.combine(&height, |w, h| w * h);
        assert_eq!(area.get(), 6);

        width.set(4);
        assert_eq!(area.get(), 12);

        height.set(10);
        assert_eq!(area.get(), 40);

        area.detach();
        assert_eq!(width.subscriber_count(), 0);
        assert_eq!(height.subscriber_count(), 0);
    }

    #[test]
    fn combine_skips_when_a_source_is_dropped() {
        let left = pack(1);
        let right = pack(2);
        let sum = left.combine(&right, |a, b| a + b);

        drop(right);
        left.set(10);
        assert_eq!(sum.get(), 3);
    }

    #[test]
    fn apply_uses_current_function_and_argument() {
        let op: Cell<Func<i32, i32>> = pack(func(|x: &i32| x + 1));
        let arg = pack(5);
        let result = op.apply(&arg);
        assert_eq!(result.get(), 6);

        arg.set(10);
        assert_eq!(result.get(), 11);

        op.set(func(|x: &i32| x * 100));
        assert_eq!(result.get(), 1000);

        result.detach();
        arg.set(1);
        op.set(func(|x: &i32| x - 1));
        assert_eq!(result.get(), 1000);
    }

    #[test]
    fn flat_map_switches_inner_cell() {
        let outer = pack(0);
        let inners: Arc<Mutex<Vec<Cell<i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let inners_clone = inners.clone();

        let derived = outer.flat_map(move |x| {
            let inner = pack(x * 10);
            inners_clone.lock().push(inner.clone());
            inner
        });
        assert_eq!(derived.get(), 0);

        let first = inners.lock()[0].clone();
        first.set(3);
        assert_eq!(derived.get(), 3);

        outer.set(1);
        assert_eq!(derived.get(), 10);
        assert_eq!(first.subscriber_count(), 0);

        first.set(99);
        assert_eq!(derived.get(), 10);

        let second = inners.lock()[1].clone();
        second.set(7);
        assert_eq!(derived.get(), 7);
    }

    #[test]
    fn flat_map_detaches_replaced_derived_inner() {
        let base = pack(1);
        let selector = pack(false);

        let base_for_inner = base.clone();
        let derived = selector.flat_map(move |scaled| {
            let factor = if *scaled { 100 } else { 1 };
            base_for_inner.map(move |v| v * factor)
        });
        assert_eq!(derived.get(), 1);
        assert_eq!(base.subscriber_count(), 1);

        base.set(2);
        assert_eq!(derived.get(), 2);

        selector.set(true);
        assert_eq!(derived.get(), 200);
        // The replaced inner map no longer listens to `base`.
        assert_eq!(base.subscriber_count(), 1);

        base.set(3);
        assert_eq!(derived.get(), 300);
    }

    #[test]
    fn flat_map_detach_releases_outer_and_inner() {
        let base = pack(1);
        let outer = pack(0);

        let base_for_inner = base.clone();
        let derived = outer.flat_map(move |offset| {
            let offset = *offset;
            base_for_inner.map(move |v| v + offset)
        });

        derived.detach();
        assert_eq!(outer.subscriber_count(), 0);
        assert_eq!(base.subscriber_count(), 0);

        outer.set(5);
        base.set(5);
        assert_eq!(derived.get(), 1);
    }

    #[test]
    fn flat_map_detached_mid_switch_drops_new_inner() {
        let outer = pack(0);
        let inners: Arc<Mutex<Vec<Cell<i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let inners_clone = inners.clone();

        let derived = outer.flat_map(move |x| {
            let inner = pack(x * 10);
            inners_clone.lock().push(inner.clone());
            inner
        });

        // Detach as soon as the switch pushes the new value.
        let handle = derived.clone();
        derived.subscribe(move |_| handle.detach());

        outer.set(1);
        assert_eq!(derived.get(), 10);
        assert!(derived.is_detached());
        assert_eq!(outer.subscriber_count(), 0);

        let second = inners.lock()[1].clone();
        assert_eq!(second.subscriber_count(), 0);
        second.set(5);
        assert_eq!(derived.get(), 10);
    }
}
