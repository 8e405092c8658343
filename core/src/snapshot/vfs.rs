//! Filesystem view of a snapshot source.
//!
//! Three trees describe a source: paths to entries, paths to errors met while
//! scanning, and `path:name` keys to extended attributes. Tree values are the
//! identifiers of the entry blobs.

use super::store::SnapshotStore;
use super::{Snapshot, VfsRoots};
use crate::btree::BTree;
use crate::objects::Object;
use crate::resources::ResourceType;
use crate::{Error, Mac, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
    pub symlink_target: Option<String>,
    /// Content record, for regular files only.
    pub object: Option<Mac>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorItem {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XattrKind {
    Extended,
    Ads,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub path: String,
    pub name: String,
    pub kind: XattrKind,
    pub size: u64,
    pub object: Option<Mac>,
}

impl Xattr {
    pub fn key(&self) -> String {
        format!("{}:{}", self.path, self.name)
    }
}

macro_rules! blob_codec {
    ($($ty:ty => $what:literal),* $(,)?) => {$(
        impl $ty {
            pub fn to_bytes(&self) -> Result<Vec<u8>> {
                Ok(bincode::serialize(self)?)
            }

            pub fn from_bytes(data: &[u8]) -> Result<Self> {
                bincode::deserialize(data)
                    .map_err(|e| Error::Format(format!(concat!("malformed ", $what, ": {}"), e)))
            }
        }
    )*};
}

blob_codec!(Entry => "vfs entry", ErrorItem => "error entry", Xattr => "xattr entry");

pub struct Filesystem<'a> {
    snapshot: &'a Snapshot,
    roots: VfsRoots,
}

impl<'a> Filesystem<'a> {
    pub fn new(snapshot: &'a Snapshot, roots: VfsRoots) -> Self {
        Self { snapshot, roots }
    }

    /// Looks up one entry by absolute path.
    pub async fn get_entry(&self, path: &str) -> Result<Option<Entry>> {
        let store = SnapshotStore::<String, Mac>::readonly(self.snapshot, ResourceType::VfsNode);
        let root = self
            .snapshot
            .load_tree_root(ResourceType::VfsBtree, &self.roots.root)
            .await?;
        let tree: BTree<'_, String, Mac, _> = BTree::load(&store, root);
        match tree.get(&path.to_string()).await? {
            Some(mac) => Ok(Some(Entry::from_bytes(
                &self.snapshot.get_blob(ResourceType::VfsEntry, &mac).await?,
            )?)),
            None => Ok(None),
        }
    }

    pub async fn entries(&self) -> Result<Vec<Entry>> {
        self.collect(
            ResourceType::VfsBtree,
            ResourceType::VfsNode,
            ResourceType::VfsEntry,
            self.roots.root,
            |data| Entry::from_bytes(data),
        )
        .await
    }

    pub async fn errors(&self) -> Result<Vec<ErrorItem>> {
        self.collect(
            ResourceType::ErrorBtree,
            ResourceType::ErrorNode,
            ResourceType::ErrorEntry,
            self.roots.errors,
            |data| ErrorItem::from_bytes(data),
        )
        .await
    }

    pub async fn xattrs(&self) -> Result<Vec<Xattr>> {
        self.collect(
            ResourceType::XattrBtree,
            ResourceType::XattrNode,
            ResourceType::XattrEntry,
            self.roots.xattrs,
            |data| Xattr::from_bytes(data),
        )
        .await
    }

    /// Reassembles a regular file from its chunks.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.get_entry(path).await?.ok_or_else(|| Error::BlobNotFound {
            resource: ResourceType::VfsEntry.to_string(),
            mac: path.to_string(),
        })?;
        let Some(object_mac) = entry.object else {
            return Err(Error::InvalidParameter(format!("{} is not a regular file", path)));
        };

        let object =
            Object::from_bytes(&self.snapshot.get_blob(ResourceType::Object, &object_mac).await?)?;
        let mut content = Vec::with_capacity(object.size() as usize);
        for chunk in &object.chunks {
            content.extend(self.snapshot.get_blob(ResourceType::Chunk, &chunk.mac).await?);
        }
        Ok(content)
    }

    async fn collect<T, F>(
        &self,
        root_type: ResourceType,
        node_type: ResourceType,
        entry_type: ResourceType,
        root_mac: Mac,
        decode: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&[u8]) -> Result<T>,
    {
        let store = SnapshotStore::<String, Mac>::readonly(self.snapshot, node_type);
        let root = self.snapshot.load_tree_root(root_type, &root_mac).await?;
        let tree: BTree<'_, String, Mac, _> = BTree::load(&store, root);

        let mut items = Vec::new();
        for (_, mac) in tree.scan().await? {
            items.push(decode(&self.snapshot.get_blob(entry_type, &mac).await?)?);
        }
        Ok(items)
    }
}
