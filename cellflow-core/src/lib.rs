//! Cellflow Core
//!
//! This crate provides a push-based reactive value graph. It implements:
//!
//! - Reactive cells holding a current value and a registry of observers
//! - Derivations (`map`, `combine`, `apply`, `flat_map`) that keep new cells
//!   synchronized with their sources
//! - Explicit teardown (`detach`) that severs a derived cell from its sources
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into a few modules:
//!
//! - `reactive`: cells, subscription registry, derivations and lifecycle
//! - `error`: the error type returned by strict writes
//! - `python`: PyO3 bindings (feature `python`)
//!
//! # Example
//!
//! ```rust
//! use cellflow_core::reactive::pack;
//!
//! // Create a cell
//! let count = pack(2);
//!
//! // Derive a value from it
//! let tripled = count.map(|v| v * 3);
//! assert_eq!(tripled.get(), 6);
//!
//! // Observe changes
//! let key = tripled.subscribe(|v| println!("tripled: {v}"));
//!
//! // Update the cell; prints "tripled: 12"
//! count.set(4);
//! assert_eq!(tripled.get(), 12);
//!
//! tripled.unsubscribe(key);
//! tripled.detach();
//! ```

pub mod error;
pub mod reactive;

#[cfg(feature = "python")]
mod python;

pub use error::{CellError, Result};
pub use reactive::{pack, setter, Cell};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
/// It registers all Python-exposed types and functions.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Register reactive primitives
    m.add_class::<python::PyCell>()?;
    m.add_class::<python::PySubscriptionKey>()?;
    m.add_function(wrap_pyfunction!(python::pack, m)?)?;

    // Add version info
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
