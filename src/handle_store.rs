//! HandleStore: sharded structural storage for reclaimable handles.
//!
//! Contract relied on by the set facade:
//! - Each shard is a generational `SlotMap` of handles plus a `RawTable`
//!   index keyed by the handle's stored hash. The index never calls
//!   `T: Hash`; growth rehashes from stored hashes.
//! - A shard is only touched through `ShardRead`/`ShardWrite`, which hold
//!   the shard's `RwLock` and a debug reentrancy guard. Insert and remove
//!   are atomic per shard; equal elements hash to the same shard, so a
//!   check-then-insert under one write guard cannot race.
//! - Walking the store is weakly consistent: callers snapshot one shard's
//!   keys at a time and resolve them later; a key whose slot is gone is
//!   simply absent.
//! - Probing may upgrade element references. Those strong references are
//!   handed back to the caller (`spill`) so they are dropped after the
//!   guard, never while the shard is locked.

use crate::handle::ReclaimableHandle;
use crate::reentrancy::{DebugReentrancy, ReentrancyGuard};
use crate::tracked::Tracked;
use core::borrow::Borrow;
use core::ops::{Deref, DerefMut};
use hashbrown::raw::RawTable;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use slotmap::{DefaultKey, SlotMap};

pub(crate) struct Shard<T> {
    index: RawTable<DefaultKey>,
    slots: SlotMap<DefaultKey, ReclaimableHandle<T>>,
}

impl<T> Shard<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            index: RawTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Key of a handle whose accessor yields a value equal to `q`.
    pub(crate) fn find<Q>(&self, hash: u64, q: &Q, spill: &mut Vec<Tracked<T>>) -> Option<DefaultKey>
    where
        T: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let slots = &self.slots;
        self.index
            .get(hash, |&k| {
                let Some(handle) = slots.get(k) else {
                    return false;
                };
                if handle.hash() != hash {
                    return false;
                }
                match handle.get() {
                    Some(live) => {
                        let hit = <T as Borrow<Q>>::borrow(&live) == q;
                        spill.push(live);
                        hit
                    }
                    None => false,
                }
            })
            .copied()
    }

    /// Insert without a duplicate check; callers probe with `find` first
    /// under the same write guard.
    pub(crate) fn insert(&mut self, handle: ReclaimableHandle<T>) -> DefaultKey {
        let hash = handle.hash();
        let k = self.slots.insert(handle);
        let slots = &self.slots;
        self.index
            .insert(hash, k, |&kk| slots.get(kk).map(|h| h.hash()).unwrap_or(0));
        k
    }

    pub(crate) fn remove(&mut self, k: DefaultKey) -> Option<ReclaimableHandle<T>> {
        let hash = self.slots.get(k)?.hash();
        // Unlink from index first
        let _removed = self.index.remove_entry(hash, |&kk| kk == k);
        self.slots.remove(k)
    }

    pub(crate) fn get(&self, k: DefaultKey) -> Option<&ReclaimableHandle<T>> {
        self.slots.get(k)
    }

    pub(crate) fn keys(&self) -> Vec<DefaultKey> {
        self.slots.keys().collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (DefaultKey, &ReclaimableHandle<T>)> {
        self.slots.iter()
    }

    /// Remove every handle, returning them with their keys.
    pub(crate) fn drain(&mut self) -> Vec<(DefaultKey, ReclaimableHandle<T>)> {
        self.index.clear();
        self.slots.drain().collect()
    }
}

pub(crate) struct HandleStore<T> {
    shards: Box<[RwLock<Shard<T>>]>,
    reentrancy: DebugReentrancy,
}

/// Read access to one shard. Field order releases the lock before the
/// reentrancy guard.
pub(crate) struct ShardRead<'a, T> {
    lock: RwLockReadGuard<'a, Shard<T>>,
    _entered: ReentrancyGuard<'a>,
}

pub(crate) struct ShardWrite<'a, T> {
    lock: RwLockWriteGuard<'a, Shard<T>>,
    _entered: ReentrancyGuard<'a>,
}

impl<'a, T> Deref for ShardRead<'a, T> {
    type Target = Shard<T>;
    fn deref(&self) -> &Shard<T> {
        &self.lock
    }
}

impl<'a, T> Deref for ShardWrite<'a, T> {
    type Target = Shard<T>;
    fn deref(&self) -> &Shard<T> {
        &self.lock
    }
}

impl<'a, T> DerefMut for ShardWrite<'a, T> {
    fn deref_mut(&mut self) -> &mut Shard<T> {
        &mut self.lock
    }
}

impl<T> HandleStore<T> {
    /// `shards` must be a power of two.
    pub(crate) fn new(shards: usize, per_shard_capacity: usize) -> Self {
        debug_assert!(shards.is_power_of_two());
        Self {
            shards: (0..shards)
                .map(|_| RwLock::new(Shard::with_capacity(per_shard_capacity)))
                .collect(),
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `hash`. Uses high bits; the index uses the low ones.
    pub(crate) fn shard_for(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) & (self.shards.len() - 1)
    }

    pub(crate) fn read(&self, shard: usize) -> ShardRead<'_, T> {
        let _entered = self.reentrancy.enter();
        ShardRead {
            lock: self.shards[shard].read(),
            _entered,
        }
    }

    pub(crate) fn write(&self, shard: usize) -> ShardWrite<'_, T> {
        let _entered = self.reentrancy.enter();
        ShardWrite {
            lock: self.shards[shard].write(),
            _entered,
        }
    }

    pub(crate) fn len(&self) -> usize {
        (0..self.shards.len()).map(|i| self.read(i).len()).sum()
    }

    /// Exclusive access without locking, for teardown.
    pub(crate) fn shards_mut(&mut self) -> impl Iterator<Item = &mut Shard<T>> {
        self.shards.iter_mut().map(RwLock::get_mut)
    }
}
