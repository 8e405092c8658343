//! Persistent B+tree whose nodes live behind a [`Storer`].
//!
//! Trees are bulk-built from sorted items and never mutated afterwards: a
//! changed tree is a new tree with a new root identifier. Leaf nodes hold
//! keys and values; internal nodes hold the smallest key of each child next
//! to the child's identifier.

use crate::{Error, Mac, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use tokio::sync::RwLock;

pub const DEFAULT_ORDER: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<K, V> {
    pub keys: Vec<K>,
    pub values: Vec<V>,
    pub pointers: Vec<Mac>,
}

impl<K, V> Node<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn leaf(keys: Vec<K>, values: Vec<V>) -> Self {
        Self {
            keys,
            values,
            pointers: Vec::new(),
        }
    }

    fn internal(keys: Vec<K>, pointers: Vec<Mac>) -> Self {
        Self {
            keys,
            values: Vec::new(),
            pointers,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.pointers.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Format(format!("malformed tree node: {}", e)))
    }
}

/// What a tree needs from storage.
#[async_trait]
pub trait Storer<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn get(&self, id: &Mac) -> Result<Node<K, V>>;

    async fn put(&self, node: &Node<K, V>) -> Result<Mac>;

    async fn update(&self, id: &Mac, node: &Node<K, V>) -> Result<()>;
}

/// Persisted handle on a tree: what the tree's root blob contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRoot {
    pub order: u32,
    pub root: Mac,
    pub count: u64,
}

impl TreeRoot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Format(format!("malformed tree root: {}", e)))
    }
}

pub struct BTree<'s, K, V, S: ?Sized> {
    store: &'s S,
    root: TreeRoot,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'s, K, V, S> BTree<'s, K, V, S>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
    S: Storer<K, V> + ?Sized,
{
    /// Builds a tree bottom-up from `items`. Items are sorted by key and
    /// later duplicates replace earlier ones.
    pub async fn build(store: &'s S, order: usize, mut items: Vec<(K, V)>) -> Result<Self> {
        if order < 2 {
            return Err(Error::InvalidParameter(format!("tree order {} is too small", order)));
        }

        items.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deduped: Vec<(K, V)> = Vec::with_capacity(items.len());
        for item in items {
            match deduped.last_mut() {
                Some(last) if last.0 == item.0 => *last = item,
                _ => deduped.push(item),
            }
        }
        let count = deduped.len() as u64;

        let mut level: Vec<(Option<K>, Mac)> = Vec::new();
        if deduped.is_empty() {
            level.push((None, store.put(&Node::leaf(Vec::new(), Vec::new())).await?));
        }
        let mut rest = deduped.into_iter().peekable();
        while rest.peek().is_some() {
            let (keys, values): (Vec<K>, Vec<V>) = rest.by_ref().take(order).unzip();
            let first = keys.first().cloned();
            level.push((first, store.put(&Node::leaf(keys, values)).await?));
        }

        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len() / order + 1);
            for group in level.chunks(order) {
                let keys: Vec<K> = group.iter().filter_map(|(key, _)| key.clone()).collect();
                let pointers: Vec<Mac> = group.iter().map(|(_, mac)| *mac).collect();
                let first = group[0].0.clone();
                parents.push((first, store.put(&Node::internal(keys, pointers)).await?));
            }
            level = parents;
        }

        Ok(Self {
            store,
            root: TreeRoot {
                order: order as u32,
                root: level[0].1,
                count,
            },
            _marker: PhantomData,
        })
    }

    pub fn load(store: &'s S, root: TreeRoot) -> Self {
        Self {
            store,
            root,
            _marker: PhantomData,
        }
    }

    pub fn root(&self) -> TreeRoot {
        self.root
    }

    pub fn len(&self) -> u64 {
        self.root.count
    }

    pub fn is_empty(&self) -> bool {
        self.root.count == 0
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let mut node = self.store.get(&self.root.root).await?;
        while !node.is_leaf() {
            let child = node.keys.partition_point(|k| k <= key);
            if child == 0 {
                return Ok(None);
            }
            node = self.store.get(&node.pointers[child - 1]).await?;
        }
        Ok(node
            .keys
            .binary_search(key)
            .ok()
            .map(|i| node.values[i].clone()))
    }

    /// All items in key order.
    pub async fn scan(&self) -> Result<Vec<(K, V)>> {
        let mut items = Vec::with_capacity(self.root.count as usize);
        let mut walker = self.walk();
        while let Some((_, node)) = walker.next().await? {
            items.extend(node.keys.into_iter().zip(node.values));
        }
        Ok(items)
    }

    pub fn walk(&self) -> NodeWalker<'s, K, V, S> {
        NodeWalker {
            store: self.store,
            stack: vec![self.root.root],
            _marker: PhantomData,
        }
    }
}

/// Depth-first, pre-order traversal yielding every node with its identifier.
pub struct NodeWalker<'s, K, V, S: ?Sized> {
    store: &'s S,
    stack: Vec<Mac>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> NodeWalker<'_, K, V, S>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
    S: Storer<K, V> + ?Sized,
{
    pub async fn next(&mut self) -> Result<Option<(Mac, Node<K, V>)>> {
        let Some(id) = self.stack.pop() else {
            return Ok(None);
        };
        let node = self.store.get(&id).await?;
        self.stack.extend(node.pointers.iter().rev().copied());
        Ok(Some((id, node)))
    }
}

/// Node store held in memory, keyed by the BLAKE3 hash of the encoded node.
pub struct MemoryStore<K, V> {
    nodes: RwLock<HashMap<Mac, Vec<u8>>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Storer<K, V> for MemoryStore<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, id: &Mac) -> Result<Node<K, V>> {
        let nodes = self.nodes.read().await;
        let data = nodes.get(id).ok_or_else(|| Error::BlobNotFound {
            resource: "btree node".to_string(),
            mac: id.to_string(),
        })?;
        Node::from_bytes(data)
    }

    async fn put(&self, node: &Node<K, V>) -> Result<Mac> {
        let data = node.to_bytes()?;
        let id = Mac::from(blake3::hash(&data));
        self.nodes.write().await.entry(id).or_insert(data);
        Ok(id)
    }

    async fn update(&self, id: &Mac, node: &Node<K, V>) -> Result<()> {
        self.nodes.write().await.insert(*id, node.to_bytes()?);
        Ok(())
    }
}
