//! ReclaimableHandle: the indirection a set stores in place of an element.

use crate::config::ReferenceKind;
use crate::tracked::{Tracked, TrackedInner};
use std::sync::Weak;

pub(crate) struct ReclaimableHandle<T> {
    referent: Weak<TrackedInner<T>>,
    hash: u64,
    kind: ReferenceKind,
}

impl<T> ReclaimableHandle<T> {
    /// `hash` must be the set hasher's hash of `*element`.
    pub(crate) fn new(element: &Tracked<T>, hash: u64, kind: ReferenceKind) -> Self {
        Self {
            referent: Tracked::downgrade(element),
            hash,
            kind,
        }
    }

    /// The accessor. Phantom handles never yield their element.
    pub(crate) fn get(&self) -> Option<Tracked<T>> {
        match self.kind {
            ReferenceKind::Weak => Tracked::upgrade(&self.referent),
            ReferenceKind::Phantom => None,
        }
    }

    /// Snapshot taken at creation; stable after the referent clears.
    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn is_cleared(&self) -> bool {
        self.referent.strong_count() == 0
    }

    /// Strong reference regardless of kind, for bookkeeping only.
    pub(crate) fn referent(&self) -> Option<Tracked<T>> {
        Tracked::upgrade(&self.referent)
    }
}
