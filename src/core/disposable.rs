//! Disposer/DisposableStore substrate (spec §4.B, §9 "Cyclic back-edges").
//!
//! Every subscription point in the core — event bus listeners, MCP
//! connection observers, scheduler alarm registrations — returns a
//! [`Disposer`]. Grouping them in a [`DisposableStore`] lets `Agent::destroy`
//! release everything exactly once without each component needing to know
//! about the others.

/// A single cleanup action. Consumed on dispose so it cannot run twice.
pub struct Disposer(Option<Box<dyn FnOnce() + Send>>);

impl Disposer {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(Some(Box::new(|| {})))
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// A group of disposers, released exactly once when the store is disposed
/// or dropped.
#[derive(Default)]
pub struct DisposableStore {
    entries: Vec<Disposer>,
    disposed: bool,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, disposer: Disposer) {
        if self.disposed {
            disposer.dispose();
            return;
        }
        self.entries.push(disposer);
    }

    pub fn dispose_all(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for disposer in self.entries.drain(..) {
            disposer.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for DisposableStore {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispose_all_runs_every_entry_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = DisposableStore::new();
        for _ in 0..3 {
            let c = counter.clone();
            store.add(Disposer::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        store.dispose_all();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        store.dispose_all();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn late_add_after_dispose_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut store = DisposableStore::new();
        store.dispose_all();
        let c = counter.clone();
        store.add(Disposer::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
