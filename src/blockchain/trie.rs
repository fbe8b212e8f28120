use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::hash::keccak_hash;

/// A trie node: an optional value plus one child per next key character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<V> {
    pub value: Option<V>,

    #[serde(rename = "childMap")]
    pub child_map: BTreeMap<char, Node<V>>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Node {
            value: None,
            child_map: BTreeMap::new(),
        }
    }
}

/// Character-keyed prefix tree whose root hash commits to its whole content
///
/// The root hash is recomputed over the full node structure after every `put`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trie<V> {
    head: Node<V>,
    root_hash: String,
}

impl<V> Default for Trie<V>
where
    V: Clone + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Trie<V>
where
    V: Clone + Serialize,
{
    /// Creates an empty trie
    pub fn new() -> Self {
        let head = Node::default();
        let root_hash = keccak_hash(&head);

        Trie { head, root_hash }
    }

    /// Hash of the current root node and everything below it
    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    /// Returns a copy of the value stored under `key`
    ///
    /// # Returns
    ///
    /// `None` when the path is missing or the node at the end holds no value
    pub fn get(&self, key: &str) -> Option<V> {
        let mut node = &self.head;

        for character in key.chars() {
            node = node.child_map.get(&character)?;
        }

        node.value.clone()
    }

    /// Stores `value` under `key`, creating intermediate nodes on the way
    pub fn put(&mut self, key: &str, value: V) {
        let mut node = &mut self.head;

        for character in key.chars() {
            node = node.child_map.entry(character).or_default();
        }

        node.value = Some(value);
        self.generate_root_hash();
    }

    fn generate_root_hash(&mut self) {
        self.root_hash = keccak_hash(&self.head);
    }

    /// Builds a trie keyed by each item's own hash
    ///
    /// Items are inserted in ascending hash order, so the root hash depends only
    /// on the set of items and not on the order they were given in.
    pub fn build_trie(items: &[V]) -> Self {
        let mut keyed: Vec<(String, &V)> = items
            .iter()
            .map(|item| (keccak_hash(item), item))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut trie = Self::new();
        for (key, item) in keyed {
            trie.put(&key, item.clone());
        }

        trie
    }
}
