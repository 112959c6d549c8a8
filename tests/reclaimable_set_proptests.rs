use proptest::prelude::*;
use reclaim_set::{ReclaimableSet, Reclaimed, Tracked};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Add(u8),
    Remove(u8),
    Release(u8),
    Contains(u8),
    RetainAll(Vec<u8>),
    Clear,
    Iterate,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let v = 0u8..8;
    prop_oneof![
        4 => v.clone().prop_map(Op::Add),
        2 => v.clone().prop_map(Op::Remove),
        3 => v.clone().prop_map(Op::Release),
        2 => v.clone().prop_map(Op::Contains),
        1 => proptest::collection::vec(v.clone(), 0..4).prop_map(Op::RetainAll),
        1 => Just(Op::Clear),
        1 => Just(Op::Iterate),
    ]
}

// Model operations on ReclaimableSet against a BTreeSet of members plus the
// owners the test still holds.
// Invariants exercised after every step:
// - Membership: add/remove/contains/retain_all/clear match the model.
// - Eviction: releasing the only owner of a member removes it and fires
//   the listener exactly once; releasing a non-member fires nothing.
// - `len` equals the model's size (the default channel reports at drop).
proptest! {
    #[test]
    fn prop_set_matches_model(ops in proptest::collection::vec(arb_op(), 1..120)) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let set = ReclaimableSet::new(move |_r: Reclaimed<u8>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut owners: HashMap<u8, Tracked<u8>> = HashMap::new();
        let mut members: BTreeSet<u8> = BTreeSet::new();
        let mut expected_fired = 0usize;

        for op in ops {
            match op {
                Op::Add(v) => {
                    let owner = owners.entry(v).or_insert_with(|| Tracked::new(v)).clone();
                    prop_assert_eq!(set.add(&owner), members.insert(v));
                }
                Op::Remove(v) => {
                    prop_assert_eq!(set.remove(&v), members.remove(&v));
                }
                Op::Release(v) => {
                    if owners.remove(&v).is_some() && members.remove(&v) {
                        expected_fired += 1;
                    }
                }
                Op::Contains(v) => {
                    prop_assert_eq!(set.contains(&v), members.contains(&v));
                }
                Op::RetainAll(keep) => {
                    let expected = if keep.is_empty() {
                        false
                    } else {
                        let before = members.len();
                        members.retain(|m| keep.contains(m));
                        members.len() != before
                    };
                    prop_assert_eq!(set.retain_all(&keep), expected);
                }
                Op::Clear => {
                    set.clear();
                    members.clear();
                }
                Op::Iterate => {
                    let seen: Vec<u8> = set.iter().map(|t| *t).collect();
                    let unique: BTreeSet<u8> = seen.iter().copied().collect();
                    prop_assert_eq!(seen.len(), unique.len());
                    prop_assert_eq!(&unique, &members);
                }
            }
            prop_assert_eq!(set.len(), members.len());
            prop_assert_eq!(fired.load(Ordering::SeqCst), expected_fired);
        }
    }
}
