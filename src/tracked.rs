//! `Tracked<T>`: shared ownership of an element that reports its own
//! reclamation.
//!
//! A `Tracked<T>` behaves like `Arc<T>`. Sets that hold the element keep
//! only a `Weak` to the shared allocation and register a watcher on it.
//! When the last `Tracked<T>` is dropped the allocation pushes every
//! watcher's `HandleId` into that watcher's channel before the value
//! itself is destroyed.

use crate::channel::{HandleId, ReclamationChannel};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct Watcher {
    channel: Weak<dyn ReclamationChannel>,
    id: HandleId,
}

pub(crate) struct TrackedInner<T> {
    watchers: Mutex<Vec<Watcher>>,
    value: T,
}

impl<T> Drop for TrackedInner<T> {
    fn drop(&mut self) {
        // Exclusive access: no other owner or set can reach the list now.
        for w in self.watchers.get_mut().drain(..) {
            if let Some(channel) = w.channel.upgrade() {
                channel.enqueue(w.id);
            }
        }
    }
}

/// Strong owner of an element stored in one or more `ReclaimableSet`s.
///
/// Equality, hashing and formatting delegate to the value.
pub struct Tracked<T> {
    inner: Arc<TrackedInner<T>>,
}

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(TrackedInner {
                watchers: Mutex::new(Vec::new()),
                value,
            }),
        }
    }

    /// True if both point to the same allocation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    /// Number of sets currently watching this element.
    pub fn watcher_count(this: &Self) -> usize {
        this.inner.watchers.lock().len()
    }

    pub(crate) fn downgrade(this: &Self) -> Weak<TrackedInner<T>> {
        Arc::downgrade(&this.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<TrackedInner<T>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Register `id` to be pushed into `channel` on final drop.
    pub(crate) fn watch(this: &Self, channel: &Arc<dyn ReclamationChannel>, id: HandleId) {
        this.inner.watchers.lock().push(Watcher {
            channel: Arc::downgrade(channel),
            id,
        });
    }

    /// Forget the watcher for `id`; also prunes watchers of dropped sets.
    pub(crate) fn unwatch(this: &Self, id: HandleId) {
        this.inner
            .watchers
            .lock()
            .retain(|w| w.id != id && w.channel.strong_count() > 0);
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> AsRef<T> for Tracked<T> {
    fn as_ref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> Borrow<T> for Tracked<T> {
    fn borrow(&self) -> &T {
        &self.inner.value
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Tracked::new(value)
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Eq> Eq for Tracked<T> {}

impl<T: Hash> Hash for Tracked<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}
