use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An immutable, cheaply cloneable view of a collection owned by the node.
///
/// The node keeps its own copy behind the same `Arc` and copies on write, so a
/// snapshot handed out earlier never observes later changes and cannot be used to
/// change node state.
pub struct Snapshot<T>(Arc<T>);

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Snapshot(Arc::new(value))
    }
}

impl<T: Clone> Snapshot<T> {
    pub(crate) fn make_mut(&mut self) -> &mut T {
        Arc::make_mut(&mut self.0)
    }

    /// Copies the contents out, for callers that want something they can change.
    pub fn to_owned_value(&self) -> T {
        (*self.0).clone()
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Snapshot(Arc::clone(&self.0))
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
