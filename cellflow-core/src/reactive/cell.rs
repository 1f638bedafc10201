//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and a
//! registry of observers that are pushed every new value.
//!
//! # How Cells Work
//!
//! 1. A write (`set`, `update`, `write`) computes the new value and stores it.
//!
//! 2. The cell then runs a notification pass: every registered observer is
//!    called with the new value, in registration order, before the write
//!    returns.
//!
//! 3. Derived cells are nothing more than observers that write into another
//!    cell, so a single write cascades synchronously through the whole
//!    dependency chain in one call stack.
//!
//! # Re-entrant Writes
//!
//! A write reaching a cell from inside its own notification pass is queued
//! and applied after that pass completes. Observers therefore always
//! see values in write order. Inside an observer, `get()` keeps returning the
//! value of the pass being delivered until the queued write is applied.
//!
//! # Panics
//!
//! A panicking observer aborts the rest of its pass and the panic propagates
//! out of the write that started it. Writes queued behind that pass are
//! discarded; the cell itself stays usable.
//!
//! # Thread Safety
//!
//! Cells are `Send + Sync`: state lives behind `parking_lot` locks, and no
//! lock is held while observers, updaters, or derivation functions run.
//! Delivery is always synchronous on the thread that owns the pass; a write
//! from another thread blocks until the running pass closes, then delivers
//! its own value before returning.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::dispatch::{Dispatcher, PassGuard, Updater};
use super::lifecycle::{Lifecycle, ScopedCell, Teardown, TeardownAction, TeardownRole};
use super::registry::{CellId, Observer, SubscriptionKey, SubscriptionRegistry};
use crate::error::{CellError, Result};

/// Shared state behind every handle to the same cell.
struct CellInner<T> {
    id: CellId,
    value: RwLock<T>,
    registry: Mutex<SubscriptionRegistry<T>>,
    dispatch: Dispatcher<T>,
    teardown: Mutex<Teardown>,
}

/// A reactive cell holding a value of type `T`.
///
/// Cloning a `Cell` creates a new handle to the **same** cell: both handles
/// see the same value and share observers.
///
/// # Example
///
/// ```rust
/// use cellflow_core::reactive::pack;
///
/// let count = pack(2);
/// let tripled = count.map(|v| v * 3);
/// assert_eq!(tripled.get(), 6);
///
/// count.set(4);
/// assert_eq!(tripled.get(), 12);
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

/// Create a root cell holding `value`.
pub fn pack<T>(value: T) -> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    Cell::new(value)
}

/// A write request: either a replacement value or an updater.
pub enum Write<T> {
    /// Replace the current value.
    Replace(T),

    /// Compute the new value from the current one.
    Apply(Updater<T>),
}

impl<T> Write<T> {
    /// Build an updater write.
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        Write::Apply(Box::new(f))
    }

    fn into_updater(self) -> Updater<T>
    where
        T: Send + 'static,
    {
        match self {
            Write::Replace(value) => Box::new(move |_| value),
            Write::Apply(update) => update,
        }
    }
}

impl<T> From<T> for Write<T> {
    fn from(value: T) -> Self {
        Write::Replace(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Write<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Write::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Write::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// Curried setter for `cell`: accepts either a replacement or an updater.
///
/// ```rust
/// use cellflow_core::reactive::{pack, setter, Write};
///
/// let cell = pack(1);
/// let set = setter(&cell);
/// set(10.into());
/// set(Write::with(|v: &i32| v + 5));
/// assert_eq!(cell.get(), 15);
/// ```
pub fn setter<T>(cell: &Cell<T>) -> impl Fn(Write<T>) + Clone + Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    let cell = cell.clone();
    move |change| cell.write(change)
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new root cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_teardown(value, Teardown::root())
    }

    /// Create a cell that will be wired to sources by a derivation.
    pub(crate) fn derived(value: T) -> Self {
        Self::with_teardown(value, Teardown::derived())
    }

    fn with_teardown(value: T, teardown: Teardown) -> Self {
        let id = CellId::next();
        Self {
            inner: Arc::new(CellInner {
                id,
                value: RwLock::new(value),
                registry: Mutex::new(SubscriptionRegistry::new(id)),
                dispatch: Dispatcher::new(),
                teardown: Mutex::new(teardown),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Access the current value by reference without cloning.
    ///
    /// `f` must not write to this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Replace the value and notify observers.
    pub fn set(&self, value: T) {
        self.write(Write::Replace(value));
    }

    /// Compute a new value from the current one and notify observers.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.write(Write::with(f));
    }

    /// Apply a replacement or an updater.
    ///
    /// Queued instead of applied immediately when this thread is already
    /// running a notification pass on the cell. A pass owned by another
    /// thread is waited out first.
    pub fn write(&self, change: impl Into<Write<T>>) {
        let update = change.into().into_updater();
        let admitted = self.inner.dispatch.begin(update);
        match admitted {
            Some(update) => self.run_pass(update),
            None => tracing::trace!(cell = %self.inner.id, "write queued behind running notification pass"),
        }
    }

    /// Like [`set`](Self::set), but rejects the write instead of queueing it
    /// when called from inside this cell's notification pass.
    pub fn try_set(&self, value: T) -> Result<()> {
        self.try_write(Write::Replace(value))
    }

    /// Like [`update`](Self::update), but rejects re-entrant writes.
    pub fn try_update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.try_write(Write::with(f))
    }

    fn try_write(&self, change: Write<T>) -> Result<()> {
        let admitted = self.inner.dispatch.try_begin();
        if !admitted {
            return Err(CellError::Reentrant {
                cell: self.inner.id,
            });
        }
        self.run_pass(change.into_updater());
        Ok(())
    }

    /// Whether a notification pass is currently running on this cell.
    pub(crate) fn is_notifying(&self) -> bool {
        self.inner.dispatch.is_notifying()
    }

    /// Apply `first`, notify, then drain writes queued during the pass.
    fn run_pass(&self, first: Updater<T>) {
        let mut guard = PassGuard::new(&self.inner.dispatch);
        let mut update = first;
        loop {
            let next = update(&self.get());
            *self.inner.value.write() = next.clone();
            self.notify(&next);

            match guard.next() {
                Some(queued) => update = queued,
                None => break,
            }
        }
    }

    /// Notify all observers registered at the start of the pass.
    fn notify(&self, value: &T) {
        let observers = self.inner.registry.lock().snapshot();
        tracing::trace!(cell = %self.inner.id, observers = observers.len(), "notifying observers");

        for (key, observer) in observers {
            // Observers removed earlier in this pass are skipped.
            let live = self.inner.registry.lock().contains(key);
            if live {
                observer(value);
            }
        }
    }

    /// Register an observer called with every new value.
    ///
    /// The observer is not called with the current value.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionKey
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer: Observer<T> = Arc::new(observer);
        let key = self.inner.registry.lock().insert(observer);
        tracing::trace!(cell = %self.inner.id, ?key, "observer subscribed");
        key
    }

    /// Register an observer that is removed when the returned guard drops.
    pub fn subscribe_scoped<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let key = self.subscribe(observer);
        Subscription {
            key,
            release: Some(self.unsubscriber(key)),
        }
    }

    /// Remove the observer registered under `key`.
    ///
    /// Unknown keys (including keys issued by other cells) are ignored.
    pub fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        let removed = self.inner.registry.lock().remove(key);
        if removed {
            tracing::trace!(cell = %self.inner.id, ?key, "observer unsubscribed");
        }
        removed
    }

    /// Remove every observer. New subscriptions work as usual afterwards.
    pub fn unsubscribe_all(&self) {
        let removed = self.inner.registry.lock().clear();
        tracing::trace!(cell = %self.inner.id, removed, "all observers unsubscribed");
    }

    /// Get the number of registered observers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Sever this cell from its sources.
    ///
    /// Runs every recorded teardown action in order, then forgets them. The
    /// cell keeps its last value and its own observers. Calling it again, or
    /// on a root cell, does nothing.
    pub fn detach(&self) {
        let actions = self.inner.teardown.lock().take_all();
        if actions.is_empty() {
            return;
        }

        tracing::debug!(cell = %self.inner.id, actions = actions.len(), "detaching cell");
        for (_, action) in actions {
            action();
        }
    }

    /// Where this cell stands in its lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.teardown.lock().lifecycle()
    }

    /// Whether [`detach`](Self::detach) has run on this derived cell.
    pub fn is_detached(&self) -> bool {
        self.lifecycle() == Lifecycle::Detached
    }

    /// Wrap this handle in a guard that detaches the cell when dropped.
    pub fn scoped(self) -> ScopedCell<T> {
        ScopedCell::new(self)
    }

    /// Curried setter for this cell. See [`setter`].
    pub fn setter(&self) -> impl Fn(Write<T>) + Clone + Send + Sync {
        setter(self)
    }

    /// Create a handle that does not keep the cell alive.
    pub fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Record a teardown action, or run it at once if already detached.
    pub(crate) fn push_teardown(&self, role: TeardownRole, action: TeardownAction) {
        let rejected = self.inner.teardown.lock().push(role, action);
        if let Some(action) = rejected {
            tracing::trace!(cell = %self.inner.id, ?role, "cell already detached; tearing down immediately");
            action();
        }
    }

    /// Remove the current inner teardown action without running it.
    pub(crate) fn take_inner_teardown(&self) -> Option<TeardownAction> {
        self.inner.teardown.lock().take_inner()
    }

    /// A teardown action removing `key` from this cell, if it still exists.
    pub(crate) fn unsubscriber(&self, key: SubscriptionKey) -> TeardownAction {
        let source = self.downgrade();
        Box::new(move || {
            if let Some(source) = source.upgrade() {
                source.unsubscribe(key);
            }
        })
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Cell<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lifecycle, teardown_actions) = {
            let teardown = self.inner.teardown.lock();
            (teardown.lifecycle(), teardown.len())
        };
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .field("notifying", &self.is_notifying())
            .field("lifecycle", &lifecycle)
            .field("teardown_actions", &teardown_actions)
            .finish()
    }
}

/// Non-owning handle to a cell.
pub struct WeakCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Weak<CellInner<T>>,
}

impl<T> WeakCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Get a strong handle if the cell still exists.
    pub fn upgrade(&self) -> Option<Cell<T>> {
        self.inner.upgrade().map(|inner| Cell { inner })
    }
}

impl<T> Clone for WeakCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCell")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// RAII guard for an observer.
///
/// Dropping the `Subscription` unsubscribes the observer.
#[must_use = "dropping a Subscription unsubscribes its observer immediately"]
pub struct Subscription {
    key: SubscriptionKey,
    release: Option<TeardownAction>,
}

impl Subscription {
    /// The key the observer is registered under.
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

// A cell serializes as its current value. Wiring is never serialized, so a
// deserialized cell is always a fresh root cell.

impl<T> Serialize for Cell<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.with(|value| value.serialize(serializer))
    }
}

impl<'de, T> Deserialize<'de> for Cell<T>
where
    T: Clone + Send + Sync + Deserialize<'de> + 'static,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Cell::new)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
