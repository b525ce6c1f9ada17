use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest_derive::Arbitrary;

use crate::ArtTree;

/// Simple model implementation using BTreeMap for comparison
#[derive(Default, Clone)]
struct Model {
    map: BTreeMap<Vec<u8>, u64>,
}

impl Model {
    fn insert(&mut self, key: Vec<u8>, value: u64) -> Option<u64> {
        self.map.insert(key, value)
    }

    fn insert_if_absent(&mut self, key: Vec<u8>, value: u64) -> Option<u64> {
        if self.map.contains_key(&key) {
            Some(value)
        } else {
            self.map.insert(key, value);
            None
        }
    }

    fn get(&self, key: &[u8]) -> Option<&u64> {
        self.map.get(key)
    }

    fn remove(&mut self, key: &[u8]) -> Option<u64> {
        self.map.remove(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Actions to test against both implementations
#[derive(Arbitrary, Debug, Clone)]
enum Action {
    Insert(KeyValue),
    InsertIfAbsent(KeyValue),
    Get(Key),
    Remove(Key),
}

/// Wrapper for key generation with custom strategy
#[derive(Debug, Clone)]
struct Key(Vec<u8>);

/// Wrapper for key-value pair
#[derive(Debug, Clone)]
struct KeyValue {
    key: Key,
    value: u64,
}

impl Arbitrary for Key {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            // Empty key
            Just(Key(vec![])),
            // Short keys (1-4 bytes)
            prop::collection::vec(any::<u8>(), 1..4).prop_map(Key),
            // Medium keys (4-64 bytes)
            prop::collection::vec(any::<u8>(), 4..64).prop_map(Key),
            // Keys with natural delimiters to exercise prefix compression
            "[a-z]{4,8}/[a-z]{1,8}".prop_map(|s| Key(s.into_bytes())),
            "[a-z]{4,8}:[a-z]{1,8}".prop_map(|s| Key(s.into_bytes())),
            // Keys that are prefixes of each other, to exercise the
            // zero-sized child edge
            "[ab]{0,6}".prop_map(|s| Key(s.into_bytes())),
            // Keys with shared prefixes
            "[a-z]{4,8}".prop_map(|prefix| {
                let mut key = prefix.into_bytes();
                key.extend_from_slice(b"/suffix");
                Key(key)
            }),
        ]
        .boxed()
    }
}

impl Arbitrary for KeyValue {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<Key>(), any::<u64>())
            .prop_map(|(key, value)| KeyValue { key, value })
            .boxed()
    }
}

/// Test harness that executes actions on both ArtTree and Model
#[derive(Default)]
struct Test {
    tree: ArtTree<u64>,
    model: Model,
}

impl Test {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Insert(kv) => {
                let key = kv.key.0;
                let tree_result = self.tree.insert(&key, kv.value);
                let model_result = self.model.insert(key.clone(), kv.value);
                assert_eq!(
                    tree_result, model_result,
                    "Insert mismatch: key={:?}",
                    key
                );
            }
            Action::InsertIfAbsent(kv) => {
                let key = kv.key.0;
                let tree_result = self.tree.insert_if_absent(&key, kv.value);
                let model_result = self.model.insert_if_absent(key.clone(), kv.value);
                assert_eq!(
                    tree_result, model_result,
                    "InsertIfAbsent mismatch: key={:?}",
                    key
                );
            }
            Action::Get(key) => {
                let tree_result = self.tree.get(&key.0);
                let model_result = self.model.get(&key.0);
                assert_eq!(
                    tree_result, model_result,
                    "Get mismatch: key={:?}",
                    key.0
                );
            }
            Action::Remove(key) => {
                let tree_result = self.tree.remove(&key.0);
                let model_result = self.model.remove(&key.0);
                assert_eq!(
                    tree_result, model_result,
                    "Remove mismatch: key={:?}",
                    key.0
                );
            }
        }
    }

    fn check_against_model(&self) {
        assert_eq!(self.tree.len(), self.model.len());

        // Full iteration must yield the model's entries in order.
        let mut visited: Vec<(Vec<u8>, u64)> = Vec::new();
        self.tree.iterate(|key, value| {
            visited.push((key.to_vec(), *value));
            false
        });
        let expected: Vec<(Vec<u8>, u64)> = self
            .model
            .map
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        assert_eq!(visited, expected, "iteration order mismatch");

        // Extremes agree with the model.
        assert_eq!(
            self.tree.minimum().map(|(k, v)| (k.to_vec(), *v)),
            self.model.map.iter().next().map(|(k, v)| (k.clone(), *v))
        );
        assert_eq!(
            self.tree.maximum().map(|(k, v)| (k.to_vec(), *v)),
            self.model.map.iter().next_back().map(|(k, v)| (k.clone(), *v))
        );

        let issues = self.tree.verify_integrity();
        assert!(issues.is_empty(), "integrity issues: {:?}", issues);
    }

    fn check_prefix_scan(&self, prefix: &[u8]) {
        let mut visited: Vec<Vec<u8>> = Vec::new();
        self.tree.iterate_prefix(prefix, |key, _| {
            visited.push(key.to_vec());
            false
        });
        let expected: Vec<Vec<u8>> = self
            .model
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        assert_eq!(visited, expected, "prefix scan mismatch for {:?}", prefix);
    }
}

proptest! {
    #[test]
    fn matches_btreemap_model(actions: Vec<Action>) {
        let mut test = Test::default();
        for action in actions {
            test.execute(action);
        }
        test.check_against_model();
    }

    #[test]
    fn prefix_scans_match_model(actions: Vec<Action>, prefix in "[a-b]{0,3}") {
        let mut test = Test::default();
        for action in actions {
            test.execute(action);
        }
        test.check_prefix_scan(prefix.as_bytes());
    }

    #[test]
    fn insert_all_then_remove_all(keys: Vec<Key>) {
        let mut tree: ArtTree<u64> = ArtTree::new();
        let mut unique: Vec<Vec<u8>> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if tree.insert(&key.0, i as u64).is_none() {
                unique.push(key.0.clone());
            }
        }
        prop_assert_eq!(tree.len(), unique.len());

        for key in &unique {
            prop_assert!(tree.remove(key).is_some());
        }
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.stats(), crate::ArtStats::default());
    }
}
