use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

/// Checks the trie invariants and returns the keys in traversal order.
fn validate_tree<'k, V>(t: &StrMap<'k, V>) -> Vec<&'k [u8]> {
    // (node, lowest crit bit allowed at it)
    let mut stack: Vec<(NodeId, usize)> = Vec::new();
    if let Some(root) = t.root {
        stack.push((root, 0));
    }

    let mut keys = Vec::new();
    let mut branches = 0usize;
    while let Some((id, min_crit)) = stack.pop() {
        match t.nodes.node(id) {
            Node::Leaf { key, .. } => keys.push(*key),
            Node::Branch { crit, child } => {
                branches += 1;
                assert!(
                    *crit >= min_crit,
                    "crit bits must strictly increase along a path"
                );
                for (dir, &c) in child.iter().enumerate() {
                    let leaf_key = t.nodes.leaf_key(t.nodes.leftmost_leaf(c));
                    assert_eq!(key_bit(leaf_key, *crit), dir, "child on wrong side");
                    stack.push((c, crit + 1));
                }
                // Both sides agree on every bit before crit.
                let left = t.nodes.leaf_key(t.nodes.leftmost_leaf(child[0]));
                let right = t.nodes.leaf_key(t.nodes.leftmost_leaf(child[1]));
                assert_eq!(first_diff_bit(left, right), Some(*crit));
            }
        }
    }

    assert_eq!(keys.len(), t.count, "reachable leaf count must match len");
    assert_eq!(branches + 1, t.count.max(1), "one branch per extra key");
    if t.count > 0 {
        assert_eq!(t.nodes.live(), 2 * t.count - 1, "arena leaks nodes");
    }

    let ordered: Vec<&[u8]> = t.iter().map(|(k, _)| k).collect();
    assert!(
        ordered.windows(2).all(|w| w[0] < w[1]),
        "iteration must be strictly ascending"
    );
    ordered
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    // A narrow alphabet (including 0x00) keeps shared and strict prefixes common.
    prop::collection::vec(prop_oneof![Just(0u8), Just(b'a'), Just(b'b'), any::<u8>()], 0..=12)
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 50)]
    Insert(#[proptest(strategy = "key_strategy()")] Vec<u8>, u64),
    #[proptest(weight = 5)]
    InsertNew(#[proptest(strategy = "key_strategy()")] Vec<u8>, u64),
    #[proptest(weight = 25)]
    Remove(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 19)]
    Get(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 1)]
    Clear,
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_u64(ops in prop::collection::vec(any::<Op>(), 0..=500)) {
        let mut t: StrMap<'_, u64> = StrMap::new();
        let mut m: BTreeMap<&[u8], u64> = BTreeMap::new();

        for op in &ops {
            match op {
                Op::Insert(key, value) => {
                    prop_assert_eq!(t.insert(key, *value), Ok(m.insert(key, *value)));
                }
                Op::InsertNew(key, value) => {
                    let expected = if m.contains_key(key.as_slice()) {
                        Err(StrMapError::KeyExists)
                    } else {
                        m.insert(key, *value);
                        Ok(())
                    };
                    prop_assert_eq!(t.insert_new(key, *value), expected);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(key).map(|(_, v)| v);
                    let old_m = m.remove(key.as_slice());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(key).copied(), m.get(key.as_slice()).copied());
                }
                Op::Clear => {
                    t.clear();
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        let keys = validate_tree(&t);
        let expected: Vec<&[u8]> = m.keys().copied().collect();
        prop_assert_eq!(keys, expected);
        let got: Vec<(&[u8], u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(&[u8], u64)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_prefix_matches_filter(
        keys in prop::collection::vec(key_strategy(), 0..=200),
        prefix in key_strategy(),
    ) {
        let mut t: StrMap<'_, usize> = StrMap::new();
        for (i, key) in keys.iter().enumerate() {
            t.insert(key, i).unwrap();
        }

        for p in [&prefix[..], &prefix[..prefix.len() / 2], &prefix[..0]] {
            let view = t.prefix(p);
            let got: Vec<(&[u8], usize)> = view.iter().map(|(k, v)| (k, *v)).collect();
            let expected: Vec<(&[u8], usize)> = t
                .iter()
                .filter(|(k, _)| k.starts_with(p))
                .map(|(k, v)| (k, *v))
                .collect();
            prop_assert_eq!(view.is_empty(), expected.is_empty());
            prop_assert_eq!(view.len(), expected.len());
            for (k, v) in &expected {
                prop_assert_eq!(view.get(k), Some(v));
            }
            prop_assert_eq!(got, expected);
        }

        prop_assert!(t.prefix(b"").is_whole_map());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

const SMALL_SET: [&[u8]; 7] = [b"", b"a", b"b", b"aa", b"ab", b"abc", b"ba"];

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        let mut t: StrMap<'_, u64> = StrMap::new();
        let mut m: BTreeMap<&[u8], u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(k, v), Ok(m.insert(k, v)));
        }

        validate_tree(&t);
        let got: Vec<(&[u8], u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(&[u8], u64)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(got, expected);

        let ab: Vec<&[u8]> = t.prefix(b"ab").iter().map(|(k, _)| k).collect();
        assert_eq!(ab, vec![&b"ab"[..], &b"abc"[..]]);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree: StrMap<'_, u64> = StrMap::new();
    let mut base_map: BTreeMap<&[u8], u64> = BTreeMap::new();
    for (i, &k) in SMALL_SET.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_tree.insert(k, v), Ok(base_map.insert(k, v)));
    }

    for_each_permutation(&SMALL_SET, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(k).map(|(_, v)| v), m.remove(k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert_eq!(t.len(), 0);
        assert!(t.root.is_none());
        assert!(t.prefix(b"").is_empty());
    });
}
