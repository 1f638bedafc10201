//! Reactive Primitives
//!
//! This module implements the push-based reactive value graph: cells, the
//! derivations that keep other cells in sync with them, and the teardown that
//! severs a derived cell from its sources.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state plus a registry of observers.
//! Every write synchronously pushes the new value to each observer, in the
//! order they subscribed, before the write returns.
//!
//! ## Derived Cells
//!
//! `map`, `combine`, `apply` and `flat_map` build new cells whose values are
//! recomputed from their sources. A derived cell is just a cell fed by
//! observers on its sources, so writes cascade through the dependency chain
//! in a single call stack.
//!
//! ## Detach
//!
//! Every derived cell records the subscriptions it depends on. Calling
//! [`Cell::detach`] removes them and freezes the cell at its last value.
//! Nothing is released automatically: an undetached derived cell keeps its
//! subscription slot on each source for as long as that source exists.
//!
//! # Implementation Notes
//!
//! There is no global runtime and no dependency tracking context. Wiring is
//! explicit: each derivation subscribes to exactly the sources it was given.
//! Propagation is depth-first and unbatched, so diamond-shaped graphs can
//! observe intermediate states.

mod cell;
mod derive;
mod dispatch;
mod lifecycle;
mod registry;

pub use cell::{pack, setter, Cell, Subscription, WeakCell, Write};
pub use derive::{func, Func};
pub use dispatch::Updater;
pub use lifecycle::{Lifecycle, ScopedCell};
pub use registry::{CellId, Observer, SubscriptionKey};
