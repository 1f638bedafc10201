//! Error types for the cell graph.
//!
//! Almost every cell operation is infallible: unknown subscription keys and
//! repeated detaches are no-ops, and panics raised by user callbacks propagate
//! to the writer unchanged. The only rejected operation is a strict write
//! (`try_set` / `try_update`) issued while the target cell is already in the
//! middle of a notification pass.

use thiserror::Error;

use crate::reactive::CellId;

/// Errors returned by the fallible cell operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CellError {
    /// A strict write reached a cell that was still notifying its observers.
    #[error("cell {cell} is already notifying its observers; re-entrant write rejected")]
    Reentrant {
        /// The cell that rejected the write.
        cell: CellId,
    },
}

/// Result alias used across the crate.
pub type Result<T, E = CellError> = std::result::Result<T, E>;
