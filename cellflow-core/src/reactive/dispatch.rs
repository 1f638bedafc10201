//! Notification pass bookkeeping.
//!
//! A cell delivers its writes one notification pass at a time, and every pass
//! is owned by the thread that opened it.
//!
//! A write that reaches the cell from the owning thread while its pass is
//! running (an observer writing back into its own source, directly or through
//! a chain of derived cells) is queued and applied once the current pass
//! finishes. Each queued write then gets a full pass of its own, in arrival
//! order, so every observer sees the values in the order they were written.
//!
//! A write from any other thread waits until the running pass closes and then
//! opens a pass of its own, so it has been delivered by the time it returns.
//! Two threads whose observers write into each other's busy cells will wait
//! on each other; cross-thread feedback loops are not supported.
//!
//! Strict writes (`try_set` / `try_update`) do not queue; they are rejected
//! when they re-enter a pass owned by their own thread, and wait like any
//! other write otherwise.
//!
//! If an observer panics, the [`PassGuard`] owned by the writer closes the
//! pass during unwinding and discards whatever was queued behind it, so the
//! cell accepts writes again afterwards.

use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

/// A deferred write: computes the next value from the current one.
pub type Updater<T> = Box<dyn FnOnce(&T) -> T + Send>;

/// Outcome of asking for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The calling thread now owns the pass.
    Granted,

    /// The calling thread already owns the running pass.
    Reentrant,

    /// Another thread owns the running pass.
    Busy,
}

/// Per-cell notification state.
pub(crate) struct Dispatch<T> {
    owner: Option<ThreadId>,
    pending: VecDeque<Updater<T>>,
}

impl<T> Dispatch<T> {
    pub(crate) fn new() -> Self {
        Self {
            owner: None,
            pending: VecDeque::new(),
        }
    }

    /// Open a pass for the current thread if none is running.
    pub(crate) fn claim(&mut self) -> Claim {
        let current = thread::current().id();
        match self.owner {
            None => {
                self.owner = Some(current);
                Claim::Granted
            }
            Some(owner) if owner == current => Claim::Reentrant,
            Some(_) => Claim::Busy,
        }
    }

    /// Queue `update` behind the running pass.
    pub(crate) fn enqueue(&mut self, update: Updater<T>) {
        self.pending.push_back(update);
    }

    /// Hand out the next queued update, closing the pass when none is left.
    pub(crate) fn next(&mut self) -> Option<Updater<T>> {
        let next = self.pending.pop_front();
        if next.is_none() {
            self.owner = None;
        }
        next
    }

    /// Close the pass and drop anything still queued.
    fn abort(&mut self) -> usize {
        self.owner = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub(crate) fn is_notifying(&self) -> bool {
        self.owner.is_some()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// A cell's [`Dispatch`] plus the condition writers from other threads wait on.
pub(crate) struct Dispatcher<T> {
    state: Mutex<Dispatch<T>>,
    idle: Condvar,
}

impl<T> Dispatcher<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(Dispatch::new()),
            idle: Condvar::new(),
        }
    }

    /// Open a pass for `update`, queue it behind this thread's running pass,
    /// or wait for another thread's pass to close.
    ///
    /// Returns the update when the caller now owns the pass.
    pub(crate) fn begin(&self, update: Updater<T>) -> Option<Updater<T>> {
        let mut state = self.state.lock();
        loop {
            match state.claim() {
                Claim::Granted => return Some(update),
                Claim::Reentrant => {
                    state.enqueue(update);
                    return None;
                }
                Claim::Busy => self.idle.wait(&mut state),
            }
        }
    }

    /// Open a pass without queueing. Returns `false` on re-entry from the
    /// owning thread; waits out passes owned by other threads.
    pub(crate) fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            match state.claim() {
                Claim::Granted => return true,
                Claim::Reentrant => return false,
                Claim::Busy => self.idle.wait(&mut state),
            }
        }
    }

    fn next(&self) -> Option<Updater<T>> {
        let next = self.state.lock().next();
        if next.is_none() {
            self.idle.notify_all();
        }
        next
    }

    fn abort(&self) -> usize {
        let dropped = self.state.lock().abort();
        self.idle.notify_all();
        dropped
    }

    pub(crate) fn is_notifying(&self) -> bool {
        self.state.lock().is_notifying()
    }
}

/// Held by the writer that owns a pass.
///
/// Closes the pass if the owner unwinds before draining the queue.
pub(crate) struct PassGuard<'a, T> {
    dispatcher: &'a Dispatcher<T>,
    armed: bool,
}

impl<'a, T> PassGuard<'a, T> {
    pub(crate) fn new(dispatcher: &'a Dispatcher<T>) -> Self {
        Self {
            dispatcher,
            armed: true,
        }
    }

    /// Next queued update for this pass; disarms the guard once the pass is closed.
    pub(crate) fn next(&mut self) -> Option<Updater<T>> {
        let next = self.dispatcher.next();
        if next.is_none() {
            self.armed = false;
        }
        next
    }
}

impl<T> Drop for PassGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let dropped = self.dispatcher.abort();
            tracing::warn!(dropped, "notification pass aborted; queued writes discarded");
        }
    }
}
