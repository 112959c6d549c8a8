//! reclaim-set: a concurrent hash set whose membership never keeps an
//! element alive. Elements whose last owner is dropped are evicted on the
//! next operation and reported once to a reclamation listener.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a general-purpose "reclaimable membership" primitive (listener
//!   registries, cache entry tracking) that cannot leak the elements it
//!   tracks.
//! - Layers:
//!   - Tracked<T>: `Arc`-like owner of an element. Its allocation carries
//!     a list of watchers, one per set holding it; the final drop pushes
//!     each watcher's `HandleId` into that set's channel.
//!   - ReclamationChannel: non-blocking queue of ids to forget. The default
//!     `QueueChannel` is a lock-free `SegQueue`; tests and embedders may
//!     inject their own.
//!   - HandleStore: sharded structural storage. Each shard is a `SlotMap`
//!     of handles with a `RawTable` index over stored hashes, behind a
//!     `parking_lot::RwLock` and a debug-only reentrancy guard.
//!   - ReclaimableSet<T, S>: public facade. Every operation except
//!     `clear` first sweeps the channel, then works on the store.
//!
//! Constraints
//! - Thread-safe: `ReclaimableSet<T>` is `Send + Sync` when `T` is.
//! - Operations are synchronous and never wait for reclamation.
//! - Stable, generational keys behind `HandleId`; an id never aliases a
//!   later handle.
//! - At most one live handle per equal element (weak references); the
//!   duplicate check and the insert happen under one shard write lock and
//!   equal elements always map to the same shard.
//!
//! Reentrancy policy
//! - The only user code run under a shard lock is `T: Eq` while probing.
//!   Element refs upgraded during a probe are released after the lock,
//!   so `Drop for T` never runs while a shard is locked.
//! - Listener callbacks and `retain` predicates run with no lock held and
//!   may call back into the set.
//! - Re-entering the store from `T: Eq` panics in debug builds instead of
//!   deadlocking.
//!
//! Hasher and rehashing invariants
//! - Each handle stores the `u64` hash computed at insertion with the
//!   set's `BuildHasher`. The index always uses the stored hash, so handles
//!   stay addressable after their element is gone and `T: Hash` is never
//!   invoked after insertion.
//!
//! Staleness
//! - Contents are a conservative snapshot: a dropped element is invisible
//!   to lookups and iteration at once (its `Weak` no longer upgrades), but
//!   `len` counts its handle until the next sweep drains the notice.
//!
//! Reference kinds
//! - `ReferenceKind::Weak` (default): the accessor yields the element
//!   while any owner exists.
//! - `ReferenceKind::Phantom`: the accessor never yields the element.
//!   Lookups, iteration and duplicate detection always see "absent";
//!   `len` and reclamation reporting still work. Suited to tracking
//!   presence tokens, not values.
//!
//! Notes and non-goals
//! - No cache coherence, discovery or distributed coordination.
//! - Set equality is handle-based: sets holding the same live elements
//!   but different not-yet-swept handles compare unequal.

mod channel;
mod config;
mod error;
mod handle;
mod handle_store;
mod handle_store_proptest;
mod listener;
mod reclaimable_set;
mod reentrancy;
mod tracked;

// Public surface
pub use channel::{HandleId, QueueChannel, ReclamationChannel};
pub use config::{
    PanicPolicy, ReferenceKind, SetConfig, MAX_CONCURRENCY_LEVEL, MAX_INITIAL_CAPACITY,
};
pub use error::SetError;
pub use listener::{NoopListener, ReclaimListener, Reclaimed};
pub use reclaimable_set::{Builder, Iter, ReclaimableSet};
pub use tracked::Tracked;
