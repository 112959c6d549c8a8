#![cfg(test)]

// Property tests for the handle store kept inside the crate so they can
// reach crate-private types.

use crate::config::ReferenceKind;
use crate::handle::ReclaimableHandle;
use crate::handle_store::Shard;
use crate::tracked::Tracked;
use proptest::prelude::*;
use slotmap::DefaultKey;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug)]
enum Op {
    Insert(u32),
    Remove(u32),
    Release(u32),
    Find(u32),
    Purge,
    Walk,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let v = 0u32..6;
    let op = prop_oneof![
        v.clone().prop_map(Op::Insert),
        v.clone().prop_map(Op::Remove),
        v.clone().prop_map(Op::Release),
        v.clone().prop_map(Op::Find),
        Just(Op::Purge),
        Just(Op::Walk),
    ];
    proptest::collection::vec(op, 1..80)
}

// Collide hashes on purpose so probing must compare values.
fn hash_of(v: u32) -> u64 {
    u64::from(v % 3)
}

fn find(shard: &Shard<u32>, v: u32) -> Option<DefaultKey> {
    let mut spill = Vec::new();
    shard.find(hash_of(v), &v, &mut spill)
}

// Property: a shard driven like the set facade drives it agrees with a model.
// Invariants exercised across random operation sequences:
// - `find` resolves exactly the live handle for a value, never a cleared one.
// - Releasing the last owner clears the handle but keeps it stored (stale)
//   under its original hash until removed.
// - `remove` of a stale or live key succeeds once and never again.
// - `len`/`keys` account for live and stale handles alike.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_shard_matches_model(ops in arb_ops()) {
        let mut shard: Shard<u32> = Shard::with_capacity(0);
        let mut live: HashMap<u32, (Tracked<u32>, DefaultKey)> = HashMap::new();
        let mut stale: Vec<DefaultKey> = Vec::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    let found = find(&shard, v);
                    match live.get(&v).map(|(_, k)| *k) {
                        Some(k) => {
                            prop_assert_eq!(found, Some(k));
                        }
                        None => {
                            prop_assert_eq!(found, None);
                            let owner = Tracked::new(v);
                            let k = shard.insert(ReclaimableHandle::new(&owner, hash_of(v), ReferenceKind::Weak));
                            live.insert(v, (owner, k));
                        }
                    }
                }
                Op::Remove(v) => {
                    let found = find(&shard, v);
                    match live.remove(&v) {
                        Some((_owner, k)) => {
                            prop_assert_eq!(found, Some(k));
                            prop_assert!(shard.remove(k).is_some());
                            prop_assert!(shard.remove(k).is_none());
                        }
                        None => {
                            prop_assert_eq!(found, None);
                        }
                    }
                }
                Op::Release(v) => {
                    if let Some((owner, k)) = live.remove(&v) {
                        drop(owner);
                        let handle = shard.get(k);
                        prop_assert!(handle.map(|h| h.is_cleared()).unwrap_or(false));
                        prop_assert_eq!(handle.map(|h| h.hash()), Some(hash_of(v)));
                        stale.push(k);
                    }
                    prop_assert_eq!(find(&shard, v), None);
                }
                Op::Find(v) => {
                    prop_assert_eq!(find(&shard, v), live.get(&v).map(|(_, k)| *k));
                }
                Op::Purge => {
                    for k in stale.drain(..) {
                        prop_assert!(shard.remove(k).is_some());
                    }
                }
                Op::Walk => {
                    let expected: BTreeSet<DefaultKey> = live
                        .values()
                        .map(|(_, k)| *k)
                        .chain(stale.iter().copied())
                        .collect();
                    let actual: BTreeSet<DefaultKey> = shard.keys().into_iter().collect();
                    prop_assert_eq!(actual, expected);
                    for (k, h) in shard.iter() {
                        prop_assert_eq!(h.is_cleared(), stale.contains(&k));
                    }
                }
            }
            prop_assert_eq!(shard.len(), live.len() + stale.len());
        }
    }
}
