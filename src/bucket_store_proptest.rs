#![cfg(test)]

// Property tests for LookupTable and its BucketStore kept inside the crate so
// they can inspect bucket placement directly.

use crate::bucket_store::Handle;
use crate::error::TableError;
use crate::hash::{xor_fold, HashFn};
use crate::lookup_table::LookupTable;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Remove(usize),
    RemoveHandle(usize),
    Lookup(usize),
    Contains(u32),
    Mutate(usize, i32),
    CheckBuckets,
}

fn key(n: u32) -> [u8; 4] {
    n.to_ne_bytes()
}

fn arb_scenario() -> impl Strategy<Value = (usize, Vec<u32>, Vec<OpI>)> {
    (0usize..=64, proptest::collection::vec(any::<u32>(), 1..=8)).prop_flat_map(|(hint, pool)| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            idx.clone().prop_map(OpI::Remove),
            idx.clone().prop_map(OpI::RemoveHandle),
            idx.clone().prop_map(OpI::Lookup),
            prop_oneof![contains_pool, any::<u32>()].prop_map(OpI::Contains),
            (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            Just(OpI::CheckBuckets),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (hint, pool.clone(), ops))
    })
}

fn zero_hash(_key: &[u8]) -> u32 {
    0
}

// State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Duplicate keys are rejected and the first value survives.
// - `find`/`lookup`/`contains_key` parity with the model; handles are stable
//   for live entries.
// - Removal by key or by handle returns the owned value matching the model
//   and invalidates the handle.
// - Every key sits in the chain its hash selects.
// - Stale handles never resolve; `len`/`is_empty` parity after each op.
fn run_scenario(hash: HashFn, hint: usize, pool: Vec<u32>, ops: Vec<OpI>) -> Result<(), TestCaseError> {
    let sut: LookupTable<i32> = LookupTable::create(hint, "prop", Some(hash), 4).unwrap();
    let mut model: HashMap<u32, i32> = HashMap::new();
    let mut live: HashMap<u32, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i];
                let already = model.contains_key(&k);
                match sut.insert(&key(k), v) {
                    Ok(h) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        prop_assert!(live.insert(k, h).is_none());
                        model.insert(k, v);
                    }
                    Err(TableError::AlreadyExists) => {
                        prop_assert!(already, "duplicate error only when key exists");
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }
            OpI::InsertWith(i, v) => {
                let k = pool[i];
                let already = model.contains_key(&k);
                let mut ran = false;
                match sut.insert_with(&key(k), || {
                    ran = true;
                    v
                }) {
                    Ok(h) => {
                        prop_assert!(!already);
                        prop_assert!(ran, "default must run on success");
                        prop_assert!(live.insert(k, h).is_none());
                        model.insert(k, v);
                    }
                    Err(e) => {
                        prop_assert_eq!(e, TableError::AlreadyExists);
                        prop_assert!(already);
                        prop_assert!(!ran, "default must not run on duplicate");
                    }
                }
            }
            OpI::Remove(i) => {
                let k = pool[i];
                match sut.remove(&key(k)) {
                    Ok(v) => {
                        prop_assert_eq!(Some(v), model.remove(&k));
                        stale.push(live.remove(&k).expect("tracked live handle"));
                    }
                    Err(e) => {
                        prop_assert_eq!(e, TableError::NotFound);
                        prop_assert!(!model.contains_key(&k));
                    }
                }
            }
            OpI::RemoveHandle(i) => {
                let k = pool[i];
                if let Some(h) = live.remove(&k) {
                    let (kk, vv) = sut.remove_handle(h).expect("handle valid for removal");
                    prop_assert_eq!(&*kk, &key(k)[..]);
                    prop_assert_eq!(Some(vv), model.remove(&k));
                    stale.push(h);
                } else {
                    prop_assert!(sut.find(&key(k)).is_none());
                }
            }
            OpI::Lookup(i) => {
                let k = pool[i];
                prop_assert_eq!(sut.lookup(&key(k)).ok(), model.get(&k).copied());
                let found = sut.find(&key(k));
                prop_assert_eq!(found, live.get(&k).copied());
            }
            OpI::Contains(k) => {
                prop_assert_eq!(sut.contains_key(&key(k)), model.contains_key(&k));
            }
            OpI::Mutate(i, d) => {
                let k = pool[i];
                if let Some(&h) = live.get(&k) {
                    let updated = sut.with_handle_mut(h, |v| {
                        *v = v.saturating_add(d);
                        *v
                    });
                    let mv = model.get_mut(&k).expect("model tracks live key");
                    *mv = mv.saturating_add(d);
                    prop_assert_eq!(updated, Some(*mv));
                }
            }
            OpI::CheckBuckets => {
                let store = sut.store_for_tests();
                let mask = sut.bucket_count() as u32 - 1;
                let mut seen = BTreeSet::new();
                for bucket in 0..sut.bucket_count() as u32 {
                    for k in store.chain_keys(bucket) {
                        prop_assert_eq!(hash(k) & mask, bucket);
                        prop_assert!(seen.insert(k.to_vec()), "key indexed twice");
                    }
                }
                let m_keys: BTreeSet<Vec<u8>> = model.keys().map(|&k| key(k).to_vec()).collect();
                prop_assert_eq!(seen, m_keys);
            }
        }

        // Post-conditions after each op
        for &h in &stale {
            prop_assert!(sut.with_handle(h, |_| ()).is_none());
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((hint, pool, ops) in arb_scenario()) {
        run_scenario(xor_fold, hint, pool, ops)?;
    }

    // Same invariants under worst-case collisions: one chain holds everything.
    #[test]
    fn prop_state_machine_with_collisions((hint, pool, ops) in arb_scenario()) {
        run_scenario(zero_hash, hint, pool, ops)?;
    }

    #[test]
    fn prop_bucket_count_covers_hint(hint in 0usize..300_000) {
        let t: LookupTable<()> = LookupTable::create(hint, "prop", None, 4).unwrap();
        let n = t.bucket_count();
        prop_assert!(n.is_power_of_two());
        prop_assert!(n <= crate::lookup_table::MAX_BUCKETS);
        prop_assert!(n >= hint.min(crate::lookup_table::MAX_BUCKETS));
        prop_assert!(n == 1 || n / 2 < hint);
    }
}
