use super::Snapshot;
use crate::btree::{Node, Storer};
use crate::resources::ResourceType;
use crate::{Error, Mac, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Tree node store backed by a snapshot's blobs.
///
/// Nodes are addressed by the repository MAC of their encoding, so `put`
/// of an unchanged node costs one existence check. `update` is always
/// rejected; a read-only view rejects `put` as well.
pub struct SnapshotStore<'a, K, V> {
    snapshot: &'a Snapshot,
    node_type: ResourceType,
    readonly: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K, V> SnapshotStore<'a, K, V> {
    pub fn new(snapshot: &'a Snapshot, node_type: ResourceType) -> Self {
        Self {
            snapshot,
            node_type,
            readonly: snapshot.is_readonly(),
            _marker: PhantomData,
        }
    }

    pub fn readonly(snapshot: &'a Snapshot, node_type: ResourceType) -> Self {
        Self {
            snapshot,
            node_type,
            readonly: true,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V> Storer<K, V> for SnapshotStore<'_, K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, id: &Mac) -> Result<Node<K, V>> {
        Node::from_bytes(&self.snapshot.get_blob(self.node_type, id).await?)
    }

    async fn put(&self, node: &Node<K, V>) -> Result<Mac> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        let data = node.to_bytes()?;
        let mac = self.snapshot.repository().compute_mac(&data);
        if !self.snapshot.blob_exists(self.node_type, &mac).await {
            self.snapshot.put_blob(self.node_type, mac, &data).await?;
        }
        Ok(mac)
    }

    /// Blobs are write-once and addressed by content, so a node can never
    /// be replaced in place. A changed node is a new `put`.
    async fn update(&self, _id: &Mac, _node: &Node<K, V>) -> Result<()> {
        Err(Error::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use crate::logging::Logger;
    use crate::storage::MemoryBackend;
    use crate::{Configuration, Repository};
    use std::sync::Arc;

    async fn repository() -> Arc<Repository> {
        let backend = Arc::new(MemoryBackend::new("store"));
        Repository::create(backend.clone(), Configuration::new(), Logger::default())
            .await
            .unwrap();
        Arc::new(
            Repository::open_uncached(backend, None, Logger::default())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let repo = repository().await;
        let snapshot = Snapshot::create(repo.clone()).await.unwrap();
        let store = SnapshotStore::<String, u32>::new(&snapshot, ResourceType::BtreeNode);

        let node = Node {
            keys: vec!["a".to_string()],
            values: vec![1],
            pointers: Vec::new(),
        };
        let first = store.put(&node).await.unwrap();
        let second = store.put(&node).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, repo.compute_mac(&node.to_bytes().unwrap()));
        assert_eq!(store.get(&first).await.unwrap(), node);
    }

    #[tokio::test]
    async fn test_update_never_rewrites_a_node() {
        let repo = repository().await;
        let snapshot = Snapshot::create(repo.clone()).await.unwrap();
        let store = SnapshotStore::<String, u32>::new(&snapshot, ResourceType::BtreeNode);

        let original = Node {
            keys: vec!["a".to_string()],
            values: vec![1],
            pointers: Vec::new(),
        };
        let replacement = Node {
            keys: vec!["b".to_string()],
            values: vec![2],
            pointers: Vec::new(),
        };
        let id = store.put(&original).await.unwrap();
        assert!(matches!(store.update(&id, &replacement).await, Err(Error::ReadOnly)));
        assert_eq!(store.get(&id).await.unwrap(), original);

        let fresh = Mac::new([9; 32]);
        assert!(matches!(store.update(&fresh, &replacement).await, Err(Error::ReadOnly)));
        assert!(!snapshot.blob_exists(ResourceType::BtreeNode, &fresh).await);
    }

    #[tokio::test]
    async fn test_readonly_view_rejects_mutation() {
        let repo = repository().await;
        let snapshot = Snapshot::create(repo).await.unwrap();
        let writable = SnapshotStore::<String, u32>::new(&snapshot, ResourceType::BtreeNode);
        let tree = BTree::build(&writable, 4, vec![("k".to_string(), 7u32)])
            .await
            .unwrap();

        let view = SnapshotStore::<String, u32>::readonly(&snapshot, ResourceType::BtreeNode);
        let node = view.get(&tree.root().root).await.unwrap();
        assert_eq!(node.values, vec![7]);
        assert!(matches!(view.put(&node).await, Err(Error::ReadOnly)));
        assert!(matches!(
            view.update(&tree.root().root, &node).await,
            Err(Error::ReadOnly)
        ));
    }
}
