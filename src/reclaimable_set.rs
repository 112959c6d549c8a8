use crate::channel::{HandleId, QueueChannel, ReclamationChannel};
use crate::config::{PanicPolicy, ReferenceKind, SetConfig, MAX_INITIAL_CAPACITY};
use crate::error::SetError;
use crate::handle::ReclaimableHandle;
use crate::handle_store::HandleStore;
use crate::listener::{ReclaimListener, Reclaimed};
use crate::tracked::Tracked;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::iter::FusedIterator;
use core::sync::atomic::{AtomicU64, Ordering};
use slotmap::DefaultKey;
use std::any::Any;
use std::collections::hash_map::{DefaultHasher, RandomState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// A concurrent hash set that never keeps its elements alive.
///
/// Elements are added as `&Tracked<T>`; the set stores a weak handle. When
/// the last `Tracked<T>` owner is dropped, on any thread, the next
/// operation on the set removes the handle and calls the listener once.
pub struct ReclaimableSet<T, S = RandomState> {
    store: HandleStore<T>,
    hasher: S,
    channel: Arc<dyn ReclamationChannel>,
    listener: Box<dyn ReclaimListener<T>>,
    config: SetConfig,
    owner: u64,
}

/// Configures and builds a `ReclaimableSet`.
pub struct Builder<T, S = RandomState> {
    config: SetConfig,
    hasher: S,
    channel: Option<Arc<dyn ReclamationChannel>>,
    listener: Box<dyn ReclaimListener<T>>,
}

impl<T> Builder<T> {
    pub fn new<L>(listener: L) -> Self
    where
        L: ReclaimListener<T> + 'static,
    {
        Self {
            config: SetConfig::default(),
            hasher: RandomState::new(),
            channel: None,
            listener: Box::new(listener),
        }
    }
}

impl<T, S> Builder<T, S> {
    pub fn config(mut self, config: SetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    pub fn concurrency_level(mut self, level: usize) -> Self {
        self.config.concurrency_level = level;
        self
    }

    pub fn reference_kind(mut self, kind: ReferenceKind) -> Self {
        self.config.reference_kind = kind;
        self
    }

    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.config.panic_policy = policy;
        self
    }

    /// Use `channel` instead of a fresh `QueueChannel`. The channel must not
    /// be shared with another set.
    pub fn channel<C: ReclamationChannel>(mut self, channel: Arc<C>) -> Self {
        self.channel = Some(channel as Arc<dyn ReclamationChannel>);
        self
    }

    pub fn hasher<S2>(self, hasher: S2) -> Builder<T, S2> {
        Builder {
            config: self.config,
            hasher,
            channel: self.channel,
            listener: self.listener,
        }
    }

    pub fn build(self) -> Result<ReclaimableSet<T, S>, SetError> {
        self.config.validate()?;
        Ok(ReclaimableSet::from_parts(
            self.config,
            self.hasher,
            self.channel,
            self.listener,
        ))
    }
}

impl<T> ReclaimableSet<T>
where
    T: Eq + Hash,
{
    /// Empty set with the default configuration.
    pub fn new<L>(listener: L) -> Self
    where
        L: ReclaimListener<T> + 'static,
    {
        Self::from_parts(
            SetConfig::default(),
            RandomState::new(),
            None,
            Box::new(listener),
        )
    }

    pub fn builder<L>(listener: L) -> Builder<T>
    where
        L: ReclaimListener<T> + 'static,
    {
        Builder::new(listener)
    }

    /// Set holding `elements`, sized for them.
    pub fn from_elements<'a, I, L>(elements: I, listener: L) -> Self
    where
        I: IntoIterator<Item = &'a Tracked<T>>,
        T: 'a,
        L: ReclaimListener<T> + 'static,
    {
        let elements = elements.into_iter();
        let config = SetConfig {
            initial_capacity: elements.size_hint().0.min(MAX_INITIAL_CAPACITY),
            ..SetConfig::default()
        };
        let set = Self::from_parts(config, RandomState::new(), None, Box::new(listener));
        set.add_all(elements);
        set
    }
}

impl<T, S> ReclaimableSet<T, S> {
    fn from_parts(
        config: SetConfig,
        hasher: S,
        channel: Option<Arc<dyn ReclamationChannel>>,
        listener: Box<dyn ReclaimListener<T>>,
    ) -> Self {
        let shards = config.shard_count();
        debug!(
            shards,
            capacity = config.initial_capacity,
            kind = ?config.reference_kind,
            "creating reclaimable set"
        );
        Self {
            store: HandleStore::new(shards, config.shard_capacity()),
            hasher,
            channel: channel.unwrap_or_else(|| Arc::new(QueueChannel::new())),
            listener,
            config,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &SetConfig {
        &self.config
    }

    /// Drain pending reclamation notices and remove their handles, calling
    /// the listener once per removed handle. Returns how many were removed.
    ///
    /// Every other operation except `clear` runs this first.
    pub fn sweep(&self) -> usize {
        let drained = self.channel.drain();
        if drained.is_empty() {
            return 0;
        }

        let mut reclaimed = 0usize;
        let mut escalated: Option<Box<dyn Any + Send>> = None;
        for id in drained {
            if id.owner() != self.owner || id.shard() >= self.store.shard_count() {
                warn!(?id, "discarding reclamation notice for a foreign handle");
                continue;
            }
            let removed = self.store.write(id.shard()).remove(id.key());
            // Already removed explicitly, or a duplicate notice.
            let Some(handle) = removed else {
                continue;
            };
            reclaimed += 1;
            let pinned = handle.referent();
            if let Some(t) = &pinned {
                Tracked::unwatch(t, id);
            }
            trace!(?id, cleared = pinned.is_none(), "reclaimed handle");
            let event = Reclaimed::new(id, handle.hash(), handle.get());
            drop(pinned);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.listener.on_reclaim(event)));
            if let Err(payload) = outcome {
                warn!(
                    ?id,
                    message = panic_message(payload.as_ref()),
                    "reclamation listener panicked"
                );
                if self.config.panic_policy == PanicPolicy::Escalate && escalated.is_none() {
                    escalated = Some(payload);
                }
            }
        }

        if reclaimed > 0 {
            debug!(reclaimed, "sweep removed stale handles");
        }
        if let Some(payload) = escalated {
            panic::resume_unwind(payload);
        }
        reclaimed
    }

    /// Number of handles, including ones whose element was dropped but whose
    /// notice has not been swept yet.
    pub fn len(&self) -> usize {
        self.sweep();
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every handle without calling the listener.
    pub fn clear(&self) {
        for shard in 0..self.store.shard_count() {
            let drained = self.store.write(shard).drain();
            for (key, handle) in drained {
                if let Some(t) = handle.referent() {
                    Tracked::unwatch(&t, HandleId::new(self.owner, shard, key));
                }
            }
        }
        trace!("cleared reclaimable set");
    }

    /// Lazy iterator over the elements that are still reachable.
    pub fn iter(&self) -> Iter<'_, T, S> {
        self.sweep();
        Iter {
            set: self,
            shard: 0,
            next_shard: 0,
            pending: Vec::new(),
            current: None,
        }
    }

    pub fn to_vec(&self) -> Vec<Tracked<T>> {
        self.iter().collect()
    }

    /// Remove the handle at `key` without calling the listener.
    fn remove_handle(&self, shard: usize, key: DefaultKey) -> bool {
        let removed = self.store.write(shard).remove(key);
        let Some(handle) = removed else {
            return false;
        };
        let id = HandleId::new(self.owner, shard, key);
        if let Some(t) = handle.referent() {
            Tracked::unwatch(&t, id);
        }
        trace!(?id, "removed handle");
        true
    }

    /// Elements visible through their handles, plus whether every handle
    /// was visible.
    fn snapshot(&self) -> (Vec<Tracked<T>>, bool) {
        let mut out = Vec::new();
        let mut complete = true;
        for shard in 0..self.store.shard_count() {
            let guard = self.store.read(shard);
            for (_, handle) in guard.iter() {
                match handle.get() {
                    Some(t) => out.push(t),
                    None => complete = false,
                }
            }
        }
        (out, complete)
    }
}

impl<T, S> ReclaimableSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        let mut h = self.hasher.build_hasher();
        q.hash(&mut h);
        h.finish()
    }

    /// Add `e` unless an equal element is already present.
    pub fn insert(&self, e: &Tracked<T>) -> Result<HandleId, SetError> {
        self.sweep();
        let hash = self.make_hash::<T>(e);
        let shard = self.store.shard_for(hash);
        let mut spill = Vec::new();
        let res = {
            let mut guard = self.store.write(shard);
            if guard.find(hash, &**e, &mut spill).is_some() {
                Err(SetError::Duplicate)
            } else {
                let key = guard.insert(ReclaimableHandle::new(e, hash, self.config.reference_kind));
                let id = HandleId::new(self.owner, shard, key);
                Tracked::watch(e, &self.channel, id);
                Ok(id)
            }
        };
        drop(spill);
        if let Ok(id) = &res {
            trace!(?id, "inserted handle");
        }
        res
    }

    /// Returns true if `e` was inserted, false if an equal element was
    /// already present.
    pub fn add(&self, e: &Tracked<T>) -> bool {
        self.insert(e).is_ok()
    }

    pub fn add_all<'a, I>(&self, elements: I) -> bool
    where
        I: IntoIterator<Item = &'a Tracked<T>>,
        T: 'a,
    {
        elements
            .into_iter()
            .fold(false, |changed, e| self.add(e) | changed)
    }

    pub fn contains<Q>(&self, q: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.sweep();
        self.locate(q).is_some()
    }

    /// Always false for an empty input.
    pub fn contains_all<'a, Q, I>(&self, elements: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq + 'a,
    {
        let mut elements = elements.into_iter().peekable();
        if elements.peek().is_none() {
            return false;
        }
        elements.all(|q| self.contains(q))
    }

    /// Id of the handle tracking an element equal to `q`.
    pub fn id_of<Q>(&self, q: &Q) -> Option<HandleId>
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.sweep();
        self.locate(q)
    }

    fn locate<Q>(&self, q: &Q) -> Option<HandleId>
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        let shard = self.store.shard_for(hash);
        let mut spill = Vec::new();
        let found = {
            let guard = self.store.read(shard);
            if guard.is_empty() {
                None
            } else {
                guard.find(hash, q, &mut spill)
            }
        };
        drop(spill);
        found.map(|key| HandleId::new(self.owner, shard, key))
    }

    /// Remove the element equal to `q`. Does not call the listener.
    pub fn remove<Q>(&self, q: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.sweep();
        let hash = self.make_hash(q);
        let shard = self.store.shard_for(hash);
        let mut spill = Vec::new();
        let removed = {
            let mut guard = self.store.write(shard);
            match guard.find(hash, q, &mut spill) {
                Some(key) => guard.remove(key).map(|handle| (key, handle)),
                None => None,
            }
        };
        drop(spill);

        let Some((key, handle)) = removed else {
            return false;
        };
        let id = HandleId::new(self.owner, shard, key);
        if let Some(t) = handle.referent() {
            Tracked::unwatch(&t, id);
        }
        trace!(?id, "removed handle");
        true
    }

    pub fn remove_all<'a, Q, I>(&self, elements: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq + 'a,
    {
        elements
            .into_iter()
            .fold(false, |changed, q| self.remove(q) | changed)
    }

    /// Remove every element for which `keep` returns false. Handles whose
    /// accessor is absent (phantom handles) count as not kept; handles
    /// whose element was already dropped are left for the sweep.
    ///
    /// `keep` runs without any store lock held.
    pub fn retain<F>(&self, mut keep: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.sweep();
        let visible = self.config.reference_kind == ReferenceKind::Weak;
        let mut changed = false;
        for shard in 0..self.store.shard_count() {
            // Pinning keeps candidates from being reclaimed mid-decision.
            let pinned: Vec<(DefaultKey, Tracked<T>)> = {
                let guard = self.store.read(shard);
                guard
                    .iter()
                    .filter_map(|(key, handle)| handle.referent().map(|t| (key, t)))
                    .collect()
            };
            let mut doomed = Vec::new();
            for (key, t) in &pinned {
                if !(visible && keep(&**t)) {
                    doomed.push(*key);
                }
            }
            if doomed.is_empty() {
                continue;
            }

            let removed: Vec<DefaultKey> = {
                let mut guard = self.store.write(shard);
                doomed
                    .into_iter()
                    .filter(|&key| guard.remove(key).is_some())
                    .collect()
            };
            for (key, t) in &pinned {
                if removed.contains(key) {
                    Tracked::unwatch(t, HandleId::new(self.owner, shard, *key));
                }
            }
            changed |= !removed.is_empty();
        }
        changed
    }

    /// Keep only elements equal to one of `elements`. An empty input
    /// removes nothing and returns false.
    pub fn retain_all<'a, Q, I>(&self, elements: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: ?Sized + Eq + 'a,
    {
        let keep: Vec<&Q> = elements.into_iter().collect();
        if keep.is_empty() {
            self.sweep();
            return false;
        }
        self.retain(|v| {
            let v = <T as Borrow<Q>>::borrow(v);
            keep.iter().any(|k| v == *k)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Lazy iterator returned by `ReclaimableSet::iter`.
///
/// Resolves one shard's keys at a time. Handles removed concurrently are
/// skipped; a handle found cleared triggers a sweep and is skipped.
pub struct Iter<'a, T, S = RandomState> {
    set: &'a ReclaimableSet<T, S>,
    shard: usize,
    next_shard: usize,
    pending: Vec<DefaultKey>,
    // Key of the element last returned, in `shard`.
    current: Option<DefaultKey>,
}

impl<'a, T, S> Iter<'a, T, S> {
    /// Like `next`, but reports exhaustion as an error.
    pub fn next_element(&mut self) -> Result<Tracked<T>, SetError> {
        self.next().ok_or(SetError::Exhausted)
    }

    /// Remove the element most recently returned by `next`, without calling
    /// the listener. Returns false if nothing was returned since the last
    /// call or the handle is already gone.
    pub fn remove_current(&mut self) -> bool {
        match self.current.take() {
            Some(key) => self.set.remove_handle(self.shard, key),
            None => false,
        }
    }
}

impl<'a, T, S> Iterator for Iter<'a, T, S> {
    type Item = Tracked<T>;

    fn next(&mut self) -> Option<Tracked<T>> {
        self.current = None;
        loop {
            if let Some(key) = self.pending.pop() {
                let probe = {
                    let guard = self.set.store.read(self.shard);
                    guard.get(key).map(|h| (h.get(), h.is_cleared()))
                };
                match probe {
                    Some((Some(live), _)) => {
                        self.current = Some(key);
                        return Some(live);
                    }
                    Some((None, true)) => {
                        self.set.sweep();
                    }
                    // Phantom handle, or removed since the snapshot.
                    Some((None, false)) | None => {}
                }
                continue;
            }
            if self.next_shard >= self.set.store.shard_count() {
                return None;
            }
            self.shard = self.next_shard;
            self.next_shard += 1;
            let mut keys = self.set.store.read(self.shard).keys();
            keys.reverse();
            self.pending = keys;
        }
    }
}

impl<'a, T, S> FusedIterator for Iter<'a, T, S> {}

impl<'a, T, S> IntoIterator for &'a ReclaimableSet<T, S> {
    type Item = Tracked<T>;
    type IntoIter = Iter<'a, T, S>;

    fn into_iter(self) -> Iter<'a, T, S> {
        self.iter()
    }
}

impl<T, S> PartialEq for ReclaimableSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    /// Handle-based: every handle of `self` must be visible and matched by
    /// an equal handle in `other`. Cleared or phantom handles only match
    /// themselves, so only `self == self` can hold when they exist.
    fn eq(&self, other: &Self) -> bool {
        if core::ptr::eq(self, other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        let (elements, complete) = self.snapshot();
        complete && elements.iter().all(|e| other.contains::<T>(&**e))
    }
}

impl<T, S> Eq for ReclaimableSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
}

impl<T, S> Hash for ReclaimableSet<T, S>
where
    T: Eq + Hash,
    S: BuildHasher,
{
    /// Order-independent sum of fixed-key element hashes, so sets with
    /// different `BuildHasher`s still hash alike when equal.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sweep();
        let (elements, _) = self.snapshot();
        let sum = elements.iter().fold(0u64, |acc, e| {
            let mut h = DefaultHasher::new();
            (**e).hash(&mut h);
            acc.wrapping_add(h.finish())
        });
        sum.hash(state);
    }
}

impl<T, S> fmt::Debug for ReclaimableSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclaimableSet")
            .field("handles", &self.store.len())
            .field("shards", &self.store.shard_count())
            .field("reference_kind", &self.config.reference_kind)
            .finish()
    }
}

impl<T, S> Drop for ReclaimableSet<T, S> {
    fn drop(&mut self) {
        let owner = self.owner;
        for (shard, s) in self.store.shards_mut().enumerate() {
            for (key, handle) in s.iter() {
                if let Some(t) = handle.referent() {
                    Tracked::unwatch(&t, HandleId::new(owner, shard, key));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NoopListener;
    use std::sync::Mutex;

    #[test]
    fn sweep_without_notices_is_free() {
        let set: ReclaimableSet<u32> = ReclaimableSet::new(NoopListener);
        assert_eq!(set.sweep(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn foreign_ids_are_discarded() {
        let ch = Arc::new(QueueChannel::new());
        let a: ReclaimableSet<u32> = ReclaimableSet::builder(NoopListener)
            .channel(ch.clone())
            .build()
            .unwrap();
        let b: ReclaimableSet<u32> = ReclaimableSet::new(NoopListener);
        let t = Tracked::new(1);
        let id = b.insert(&t).unwrap();
        assert!(a.add(&t));

        ch.enqueue(id);
        assert_eq!(a.sweep(), 0);
        assert!(a.contains(&1));
        assert!(b.contains(&1));
    }

    #[test]
    fn synthesized_notice_reports_live_element() {
        let ch = Arc::new(QueueChannel::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let set: ReclaimableSet<String> = ReclaimableSet::builder(move |r: Reclaimed<String>| {
            sink.lock().unwrap().push(r.into_last_known().map(|t| (*t).clone()));
        })
        .channel(ch.clone())
        .build()
        .unwrap();

        let t = Tracked::new("alive".to_string());
        let id = set.insert(&t).unwrap();
        ch.enqueue(id);
        assert!(!set.contains("alive"));
        assert_eq!(*seen.lock().unwrap(), vec![Some("alive".to_string())]);
        assert_eq!(Tracked::watcher_count(&t), 0);

        // A second notice for the same id is a no-op.
        ch.enqueue(id);
        assert_eq!(set.sweep(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn dropping_the_set_unregisters_watchers() {
        let t = Tracked::new(9u64);
        {
            let set: ReclaimableSet<u64> = ReclaimableSet::new(NoopListener);
            set.add(&t);
            assert_eq!(Tracked::watcher_count(&t), 1);
        }
        assert_eq!(Tracked::watcher_count(&t), 0);
    }

    #[test]
    fn debug_reports_shape() {
        let set: ReclaimableSet<u8> = ReclaimableSet::builder(NoopListener)
            .concurrency_level(3)
            .build()
            .unwrap();
        let s = format!("{:?}", set);
        assert!(s.contains("shards: 4"));
        assert!(s.contains("Weak"));
    }
}
