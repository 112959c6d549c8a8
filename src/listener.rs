//! Reclamation listener: the single extension point fired by sweeps.

use crate::channel::HandleId;
use crate::tracked::Tracked;

/// What a sweep knows about a handle it just removed.
#[derive(Debug)]
pub struct Reclaimed<T> {
    id: HandleId,
    hash: u64,
    last_known: Option<Tracked<T>>,
}

impl<T> Reclaimed<T> {
    pub(crate) fn new(id: HandleId, hash: u64, last_known: Option<Tracked<T>>) -> Self {
        Self {
            id,
            hash,
            last_known,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Hash snapshot the handle was indexed under.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The element, if a weak handle could still reach it. `None` after a
    /// real final drop, and always for phantom handles.
    pub fn last_known(&self) -> Option<&Tracked<T>> {
        self.last_known.as_ref()
    }

    pub fn into_last_known(self) -> Option<Tracked<T>> {
        self.last_known
    }
}

/// Called once per handle removed by a sweep. Never called for handles
/// removed through `remove`, `retain` or `clear`, and never under a store
/// lock.
pub trait ReclaimListener<T>: Send + Sync {
    fn on_reclaim(&self, reclaimed: Reclaimed<T>);
}

impl<T, F> ReclaimListener<T> for F
where
    F: Fn(Reclaimed<T>) + Send + Sync,
{
    fn on_reclaim(&self, reclaimed: Reclaimed<T>) {
        self(reclaimed)
    }
}

/// Listener that ignores every reclamation.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopListener;

impl<T> ReclaimListener<T> for NoopListener {
    fn on_reclaim(&self, _reclaimed: Reclaimed<T>) {}
}
