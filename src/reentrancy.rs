//! Debug-only reentrancy guard.
//!
//! Detects a thread re-entering a store while it already holds one of the
//! store's shard locks. That can only happen through user code running
//! under the lock (`T: Eq` while probing) and would otherwise deadlock on
//! the `RwLock`. In debug builds, entering twice on the same thread without
//! dropping the guard panics. In release builds, this compiles to a
//! zero-cost no-op.

use core::marker::PhantomData;
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};
#[cfg(debug_assertions)]
use std::cell::RefCell;

#[cfg(debug_assertions)]
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[cfg(debug_assertions)]
thread_local! {
    // Trackers this thread is currently inside of.
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Per-instance reentrancy tracker. Embed this in a store and guard each
/// lock acquisition with `let _g = self.reentrancy.enter();`.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: usize,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Enter a guarded section. In debug builds, panics if this thread has
    /// already entered the same tracker.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            ENTERED.with(|e| {
                let mut e = e.borrow_mut();
                assert!(
                    !e.contains(&self.id),
                    "reentrancy detected: nested entry into data structure"
                );
                e.push(self.id);
            });
            ReentrancyGuard {
                owner: self,
                _nosend: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard {
                _z: PhantomData,
                _nosend: PhantomData,
            }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`. Bound to the entering
/// thread.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
    _nosend: PhantomData<*mut ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let id = self.owner.id;
            ENTERED.with(|e| {
                let mut e = e.borrow_mut();
                let pos = e.iter().rposition(|&x| x == id);
                debug_assert!(pos.is_some());
                if let Some(pos) = pos {
                    e.swap_remove(pos);
                }
            });
        }
    }
}
