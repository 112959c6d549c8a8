//! Reclamation channel: the conduit through which dropped elements tell
//! the sets that track them to forget their handles.

use crossbeam_queue::SegQueue;
use slotmap::DefaultKey;

/// Identifier of one handle inside one set.
///
/// The slot key is generational, so an id never resolves to a handle
/// created later in the same slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HandleId {
    owner: u64,
    shard: u32,
    key: DefaultKey,
}

impl HandleId {
    pub(crate) fn new(owner: u64, shard: usize, key: DefaultKey) -> Self {
        Self {
            owner,
            shard: shard as u32,
            key,
        }
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn shard(&self) -> usize {
        self.shard as usize
    }

    pub(crate) fn key(&self) -> DefaultKey {
        self.key
    }
}

/// Queue of handle ids whose referents became unreachable.
///
/// `Tracked` calls `enqueue` from whichever thread drops an element's last
/// owner; the owning set calls `drain` at the start of its operations.
/// Implementations must never block in either method. A channel serves
/// exactly one set: ids belonging to another set are discarded on drain.
pub trait ReclamationChannel: Send + Sync + 'static {
    fn enqueue(&self, id: HandleId);

    /// Returns the ids enqueued before this call started, or an empty
    /// vector. Ids enqueued concurrently may be left for the next drain.
    fn drain(&self) -> Vec<HandleId>;
}

/// Lock-free default channel.
#[derive(Debug, Default)]
pub struct QueueChannel {
    queue: SegQueue<HandleId>,
}

impl QueueChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl ReclamationChannel for QueueChannel {
    fn enqueue(&self, id: HandleId) {
        self.queue.push(id);
    }

    fn drain(&self) -> Vec<HandleId> {
        // Bound by the length seen at entry so producers cannot starve us.
        let pending = self.queue.len();
        let mut out = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.queue.pop() {
                Some(id) => out.push(id),
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn drain_returns_enqueued_ids_in_order() {
        let mut keys: SlotMap<DefaultKey, ()> = SlotMap::new();
        let a = HandleId::new(1, 0, keys.insert(()));
        let b = HandleId::new(1, 3, keys.insert(()));

        let ch = QueueChannel::new();
        assert!(ch.drain().is_empty());
        ch.enqueue(a);
        ch.enqueue(b);
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.drain(), vec![a, b]);
        assert!(ch.is_empty());
        assert!(ch.drain().is_empty());
    }

    #[test]
    fn ids_from_reused_slots_differ() {
        let mut keys: SlotMap<DefaultKey, ()> = SlotMap::new();
        let k1 = keys.insert(());
        keys.remove(k1);
        let k2 = keys.insert(());
        assert_ne!(HandleId::new(7, 0, k1), HandleId::new(7, 0, k2));
        assert_eq!(HandleId::new(7, 2, k2).shard(), 2);
        assert_eq!(HandleId::new(7, 2, k2).owner(), 7);
    }
}
