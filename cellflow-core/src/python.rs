//! Python Bindings
//!
//! Exposes [`Cell`] to Python as `Cell`, holding arbitrary Python objects.
//! Callables passed to `subscribe`, `update`, `map`, `apply` and `flat_map`
//! run with the GIL held, synchronously, on the thread doing the write.
//! Writes release the GIL while they wait for another thread's pass.
//!
//! A callable that raises aborts the notification pass it runs in. The
//! exception is logged and the originating write raises a `PanicException`
//! carrying its message.

use std::sync::Arc;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;

use crate::error::CellError;
use crate::reactive::{Cell, Lifecycle, SubscriptionKey};

/// A Python object stored in a cell.
///
/// `Py<PyAny>` is not `Clone` without the GIL, so the reference is shared
/// behind an `Arc` instead.
#[derive(Clone)]
pub struct PyValue(Arc<PyObject>);

impl PyValue {
    fn new(object: PyObject) -> Self {
        Self(Arc::new(object))
    }

    fn to_object(&self, py: Python<'_>) -> PyObject {
        self.0.clone_ref(py)
    }
}

/// Call `callable(arg)`, escalating a Python exception to a panic.
fn call(callable: &PyObject, arg: &PyValue) -> PyValue {
    Python::with_gil(|py| match callable.call1(py, (arg.to_object(py),)) {
        Ok(result) => PyValue::new(result),
        Err(err) => raise(err),
    })
}

fn raise(err: PyErr) -> ! {
    tracing::error!(%err, "python callback raised; aborting notification pass");
    panic!("python callback raised: {err}");
}

impl From<CellError> for PyErr {
    fn from(err: CellError) -> Self {
        PyRuntimeError::new_err(err.to_string())
    }
}

/// Python-exposed cell type.
#[pyclass(name = "Cell")]
pub struct PyCell {
    inner: Cell<PyValue>,
}

impl PyCell {
    fn wrap(inner: Cell<PyValue>) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyCell {
    /// Create a new root cell with the given initial value.
    #[new]
    fn new(value: PyObject) -> Self {
        Self::wrap(Cell::new(PyValue::new(value)))
    }

    /// Get the current value.
    #[getter]
    fn value(&self, py: Python<'_>) -> PyObject {
        self.inner.get().to_object(py)
    }

    /// Replace the value and notify observers.
    #[setter]
    fn set_value(&self, py: Python<'_>, value: PyObject) {
        let value = PyValue::new(value);
        py.allow_threads(|| self.inner.set(value));
    }

    /// Compute the new value as `updater(current)`.
    fn update(&self, py: Python<'_>, updater: PyObject) {
        py.allow_threads(|| self.inner.update(move |current| call(&updater, current)));
    }

    /// Replace the value, raising if the cell is mid-notification.
    fn try_set(&self, py: Python<'_>, value: PyObject) -> PyResult<()> {
        let value = PyValue::new(value);
        py.allow_threads(|| self.inner.try_set(value))?;
        Ok(())
    }

    fn subscribe(&self, observer: PyObject) -> PySubscriptionKey {
        let key = self.inner.subscribe(move |value| {
            call(&observer, value);
        });
        PySubscriptionKey(key)
    }

    fn unsubscribe(&self, key: PySubscriptionKey) -> bool {
        self.inner.unsubscribe(key.0)
    }

    fn unsubscribe_all(&self) {
        self.inner.unsubscribe_all();
    }

    fn map(&self, func: PyObject) -> Self {
        Self::wrap(self.inner.map(move |value| call(&func, value)))
    }

    /// `self` must hold a callable; the result holds `self.value(other.value)`.
    fn apply(&self, other: PyRef<'_, Self>) -> Self {
        Self::wrap(self.inner.combine(&other.inner, |f, arg| call(&f.0, arg)))
    }

    /// `func` must return a `Cell`.
    fn flat_map(&self, func: PyObject) -> Self {
        Self::wrap(self.inner.flat_map(move |value| {
            let selected = call(&func, value);
            Python::with_gil(|py| match selected.0.bind(py).downcast::<PyCell>() {
                Ok(cell) => cell.borrow().inner.clone(),
                Err(err) => raise(err.into()),
            })
        }))
    }

    fn detach(&self) {
        self.inner.detach();
    }

    #[getter]
    fn detached(&self) -> bool {
        self.inner.is_detached()
    }

    #[getter]
    fn derived(&self) -> bool {
        self.inner.lifecycle() != Lifecycle::Root
    }

    #[getter]
    fn id(&self) -> u64 {
        self.inner.id().raw()
    }

    fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let value = self.inner.get();
        let repr = value
            .0
            .bind(py)
            .repr()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| "?".to_string());
        format!(
            "Cell(id={}, value={}, subscribers={}, lifecycle={:?})",
            self.inner.id().raw(),
            repr,
            self.inner.subscriber_count(),
            self.inner.lifecycle()
        )
    }
}

/// Python-exposed subscription key.
#[pyclass(name = "SubscriptionKey", frozen)]
#[derive(Clone, Copy)]
pub struct PySubscriptionKey(SubscriptionKey);

#[pymethods]
impl PySubscriptionKey {
    /// ID of the cell that issued this key.
    #[getter]
    fn cell(&self) -> u64 {
        self.0.cell().raw()
    }

    fn __repr__(&self) -> String {
        format!("SubscriptionKey(cell={})", self.0.cell().raw())
    }
}

/// Create a root cell holding `value`.
#[pyfunction]
pub fn pack(value: PyObject) -> PyCell {
    PyCell::new(value)
}
