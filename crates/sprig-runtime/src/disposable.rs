//! Ordered teardown lists.
//!
//! Every scope (the root, a runtime's body, a fork) owns one
//! [`DisposableList`]. Side effects register their teardown on the list of
//! the scope that created them, and disposing the scope runs them in
//! registration order.
//!
//! The list is always snapshotted and cleared before any teardown runs, so a
//! teardown that registers or disposes other entries while the list is being
//! drained can neither double-run nor skip an entry.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use uuid::Uuid;

type Teardown = Box<dyn FnOnce() + Send>;

/// Identifier of one registered teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisposableId(Uuid);

impl DisposableId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Ordered list of pending teardowns owned by one scope.
#[derive(Default)]
pub struct DisposableList {
    entries: Mutex<Vec<(DisposableId, Teardown)>>,
}

impl fmt::Debug for DisposableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableList")
            .field("len", &self.len())
            .finish()
    }
}

impl DisposableList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(DisposableId, Teardown)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a teardown and return a handle to it.
    pub fn push(self: &Arc<Self>, teardown: impl FnOnce() + Send + 'static) -> Disposable {
        let id = DisposableId::new();
        self.lock().push((id, Box::new(teardown)));
        Disposable {
            list: Arc::downgrade(self),
            id,
        }
    }

    /// Detach a teardown without running it.
    fn take(&self, id: DisposableId) -> Option<Teardown> {
        let mut entries = self.lock();
        let index = entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(entries.remove(index).1)
    }

    /// Run and clear every pending teardown in registration order.
    ///
    /// Returns the number of teardowns that ran.
    pub fn dispose_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let count = drained.len();
        for (_, teardown) in drained {
            teardown();
        }
        count
    }

    /// Number of pending teardowns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no teardown is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Handle to one teardown registered on a [`DisposableList`].
///
/// The teardown runs at most once, either through [`Disposable::dispose`] or
/// when its owning list is disposed.
#[derive(Debug, Clone)]
pub struct Disposable {
    list: Weak<DisposableList>,
    id: DisposableId,
}

impl Disposable {
    /// The teardown's identifier.
    #[must_use]
    pub fn id(&self) -> DisposableId {
        self.id
    }

    /// Run the teardown now and remove it from its list.
    ///
    /// Returns `false` if it already ran or was detached.
    pub fn dispose(&self) -> bool {
        match self.list.upgrade().and_then(|list| list.take(self.id)) {
            Some(teardown) => {
                teardown();
                true
            },
            None => false,
        }
    }

    /// Remove the teardown from its list without running it.
    pub fn detach(&self) -> bool {
        self.list
            .upgrade()
            .and_then(|list| list.take(self.id))
            .is_some()
    }

    /// Whether the teardown is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.lock().iter().any(|(id, _)| *id == self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispose_all_runs_in_order() {
        let list = DisposableList::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            list.push(move || order.lock().unwrap().push(i));
        }

        assert_eq!(list.dispose_all(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_handle_runs_once() {
        let list = DisposableList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = list.push(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_pending());
        assert!(handle.dispose());
        assert!(!handle.dispose());
        assert_eq!(list.dispose_all(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_skips_teardown() {
        let list = DisposableList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = list.push(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.detach());
        list.dispose_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reentrant_push_during_dispose() {
        // A teardown that registers a new entry must not have it run in the
        // same pass; the new entry stays pending for the next one.
        let list = DisposableList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_list = Arc::clone(&list);
        let counter = Arc::clone(&count);
        list.push(move || {
            let counter = Arc::clone(&counter);
            inner_list.push(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(list.dispose_all(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(list.len(), 1);
        assert_eq!(list.dispose_all(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_dispose_of_sibling() {
        let list = DisposableList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sibling = list.push(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let first = list.push(move || {
            sibling.dispose();
        });
        // `first` was registered after `sibling`, so draining runs `sibling`
        // first; the nested dispose then finds nothing left to run.
        drop(first);

        list.dispose_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
