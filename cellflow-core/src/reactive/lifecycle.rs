//! Lifecycle and Detach
//!
//! Every derived cell records how to undo the subscriptions that feed it.
//! Those teardown actions are stored in the order they were created, tagged
//! with the role they play:
//!
//! - [`TeardownRole::Upstream`]: a subscription on a source cell, created once
//!   at construction time.
//! - [`TeardownRole::Inner`]: the forwarding subscription a `flat_map` cell
//!   holds on its currently selected inner cell. There is at most one and it
//!   is replaced every time the outer source switches to a new inner cell.
//!
//! `detach` runs every recorded action and moves the cell to
//! [`Lifecycle::Detached`], a terminal state. Detaching is the only way wiring
//! is ever removed; [`ScopedCell`] ties it to a guard's lifetime for callers
//! that want RAII.

use std::fmt;
use std::ops::Deref;

use smallvec::SmallVec;

use super::cell::Cell;

/// A stored callback that removes a previously created subscription.
pub(crate) type TeardownAction = Box<dyn FnOnce() + Send>;

/// Actions handed back to the caller to run outside the teardown lock.
pub(crate) type TeardownBatch = SmallVec<[(TeardownRole, TeardownAction); 2]>;

/// Where a cell stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created directly with `pack`; has no sources, detach does nothing.
    Root,

    /// Derived and still wired to its sources.
    Active,

    /// Derived and permanently severed from its sources. Terminal.
    Detached,
}

/// What a teardown action undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownRole {
    /// A subscription on one of the cell's sources.
    Upstream,

    /// The forwarding subscription on a `flat_map` cell's current inner cell.
    Inner,
}

/// Ordered teardown actions plus the lifecycle state they drive.
pub(crate) struct Teardown {
    lifecycle: Lifecycle,
    actions: TeardownBatch,
}

impl Teardown {
    pub(crate) fn root() -> Self {
        Self {
            lifecycle: Lifecycle::Root,
            actions: SmallVec::new(),
        }
    }

    pub(crate) fn derived() -> Self {
        Self {
            lifecycle: Lifecycle::Active,
            actions: SmallVec::new(),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    /// Record an action.
    ///
    /// A detached cell accepts nothing new: the action is handed back so the
    /// caller can run it right away.
    pub(crate) fn push(
        &mut self,
        role: TeardownRole,
        action: TeardownAction,
    ) -> Option<TeardownAction> {
        if self.lifecycle == Lifecycle::Detached {
            return Some(action);
        }
        self.actions.push((role, action));
        None
    }

    /// Remove the current [`TeardownRole::Inner`] action, if any.
    pub(crate) fn take_inner(&mut self) -> Option<TeardownAction> {
        let index = self
            .actions
            .iter()
            .position(|(role, _)| *role == TeardownRole::Inner)?;
        Some(self.actions.remove(index).1)
    }

    /// Take every action in recorded order and mark a derived cell detached.
    pub(crate) fn take_all(&mut self) -> TeardownBatch {
        if self.lifecycle == Lifecycle::Active {
            self.lifecycle = Lifecycle::Detached;
        }
        std::mem::take(&mut self.actions)
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<TeardownRole> = self.actions.iter().map(|(role, _)| *role).collect();
        f.debug_struct("Teardown")
            .field("lifecycle", &self.lifecycle)
            .field("roles", &roles)
            .finish()
    }
}

/// Guard that detaches its cell when dropped.
///
/// Obtained from [`Cell::scoped`]. Dereferences to the cell, so it can be
/// read, subscribed to, and derived from like any other handle. Clones taken
/// through the guard share the same state and are frozen along with it.
pub struct ScopedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Cell<T>,
}

impl<T> ScopedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(cell: Cell<T>) -> Self {
        Self { cell }
    }
}

impl<T> Deref for ScopedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Target = Cell<T>;

    fn deref(&self) -> &Cell<T> {
        &self.cell
    }
}

impl<T> Drop for ScopedCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cell.detach();
    }
}

impl<T> fmt::Debug for ScopedCell<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedCell").field(&self.cell).finish()
    }
}
